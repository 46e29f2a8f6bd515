//! Sub-commands of `patchwork-ci`.

mod list;

use std::fmt::Write;

use lib::core::metadata::parse_series_id_from_pr_title;
use lib::util::{ExitCode, EyreExitOr};
use patchwork_ci_invoke::CommandContext;
use patchwork_ci_opts::{Command, Opts};

fn command_main(ctx: CommandContext, opts: Opts) -> EyreExitOr<()> {
    let CommandContext {
        effects,
        process_run_info: _,
        config_path,
    } = ctx.clone();
    let Opts {
        global_args: _,
        command,
    } = opts;

    let exit_code = match command {
        Command::Run(args) => patchwork_ci_test::command_main(ctx, args)?,

        Command::SeriesId { title } => match parse_series_id_from_pr_title(&title) {
            Some(series_id) => {
                writeln!(effects.get_output_stream(), "{series_id}")?;
                Ok(())
            }
            None => {
                writeln!(
                    effects.get_error_stream(),
                    "Could not find a series ID in the pull request title: {title:?}"
                )?;
                Err(ExitCode(1))
            }
        },

        Command::List => list::list(&effects, &config_path)?,
    };

    Ok(exit_code)
}

/// Execute the main process and exit with the appropriate exit code.
pub fn main() {
    patchwork_ci_invoke::invoke_subcommand_main(command_main)
}
