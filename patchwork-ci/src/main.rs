fn main() {
    patchwork_ci::commands::main()
}
