//! Wrappers around various side effects.
//!
//! Output is never written directly to stdout or stderr. Instead, an
//! [`Effects`] handle is constructed once at startup and passed down to every
//! component that needs to talk to the user. This makes it possible to capture
//! output in tests and to attribute interleaved lines to the test which
//! produced them.

use std::fmt::{self, Write};
use std::io::{self, stderr, stdout, Write as WriteIo};
use std::mem::take;
use std::sync::{Arc, Mutex};

use bstr::ByteSlice;

/// Icons and other characters used when rendering output.
#[derive(Clone, Debug)]
pub struct Glyphs {
    /// Whether or not ANSI escape codes should be emitted (e.g. to render
    /// color).
    pub should_write_ansi_escape_codes: bool,

    /// Bullet point for lists.
    pub bullet_point: &'static str,

    /// Icon for a passing test.
    pub checkmark: &'static str,

    /// Icon for a failing test.
    pub cross: &'static str,

    /// Icon for a test which produced a warning or could not be run.
    pub exclamation: &'static str,

    /// Icon for a skipped test.
    pub skipped: &'static str,
}

impl Glyphs {
    /// Glyphs to use when rendering to a plain text destination.
    pub fn text() -> Self {
        Glyphs {
            should_write_ansi_escape_codes: false,
            bullet_point: "-",
            checkmark: "✓",
            cross: "X",
            exclamation: "!",
            skipped: "-",
        }
    }

    /// Glyphs to use when rendering to a color terminal.
    pub fn pretty() -> Self {
        Glyphs {
            should_write_ansi_escape_codes: true,
            bullet_point: "•",
            checkmark: "✓",
            cross: "✗",
            exclamation: "!",
            skipped: "⊘",
        }
    }

    /// Choose between [`Glyphs::pretty`] and [`Glyphs::text`] depending on
    /// whether stdout is attended by a terminal.
    pub fn detect() -> Self {
        if console::user_attended() && console::colors_enabled() {
            Glyphs::pretty()
        } else {
            Glyphs::text()
        }
    }

    /// Apply the given style to `text` if ANSI escape codes are enabled.
    pub fn paint(&self, style: &console::Style, text: impl fmt::Display) -> String {
        if self.should_write_ansi_escape_codes {
            style.apply_to(text).force_styling(true).to_string()
        } else {
            text.to_string()
        }
    }
}

#[derive(Clone, Debug)]
enum OutputDest {
    Stdout,
    Suppress,
    BufferForTest {
        stdout: Arc<Mutex<Vec<u8>>>,
        stderr: Arc<Mutex<Vec<u8>>>,
    },
}

#[derive(Clone, Copy, Debug)]
enum StreamKind {
    Output,
    Error,
}

/// Wrapper around side-effectful operations, such as output.
#[derive(Clone)]
pub struct Effects {
    glyphs: Glyphs,
    dest: OutputDest,
    prefix: Option<Arc<str>>,
}

impl std::fmt::Debug for Effects {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<Effects fancy={} prefix={:?}>",
            self.glyphs.should_write_ansi_escape_codes, self.prefix
        )
    }
}

impl Effects {
    /// Constructor. Writes to stdout and stderr.
    pub fn new(glyphs: Glyphs) -> Self {
        Effects {
            glyphs,
            dest: OutputDest::Stdout,
            prefix: None,
        }
    }

    /// Constructor. Suppresses all output.
    pub fn new_suppress_for_test(glyphs: Glyphs) -> Self {
        Effects {
            glyphs,
            dest: OutputDest::Suppress,
            prefix: None,
        }
    }

    /// Constructor. Writes to the provided buffers.
    pub fn new_from_buffer_for_test(
        glyphs: Glyphs,
        stdout: &Arc<Mutex<Vec<u8>>>,
        stderr: &Arc<Mutex<Vec<u8>>>,
    ) -> Self {
        Effects {
            glyphs,
            dest: OutputDest::BufferForTest {
                stdout: Arc::clone(stdout),
                stderr: Arc::clone(stderr),
            },
            prefix: None,
        }
    }

    /// Return a copy of this `Effects` which suppresses all output.
    pub fn suppress(&self) -> Self {
        Self {
            dest: OutputDest::Suppress,
            ..self.clone()
        }
    }

    /// Return a copy of this `Effects` which prefixes every line written
    /// with `name`. Prefixes nest: a prefixed handle prefixed again renders
    /// as `outer: inner: line`.
    pub fn with_prefix(&self, name: &str) -> Self {
        let prefix = match &self.prefix {
            None => name.to_string(),
            Some(existing) => format!("{existing}: {name}"),
        };
        Self {
            prefix: Some(prefix.into()),
            ..self.clone()
        }
    }

    /// Get the set of glyphs associated with the output.
    pub fn get_glyphs(&self) -> &Glyphs {
        &self.glyphs
    }

    /// Create a stream that can be written to. The output goes to stdout
    /// unless this handle was constructed for testing.
    pub fn get_output_stream(&self) -> OutputStream {
        OutputStream(self.make_writer(StreamKind::Output))
    }

    /// Create a stream that error output can be written to, rather than regular
    /// output.
    pub fn get_error_stream(&self) -> ErrorStream {
        ErrorStream(self.make_writer(StreamKind::Error))
    }

    fn make_writer(&self, kind: StreamKind) -> LineWriter {
        LineWriter {
            dest: self.dest.clone(),
            kind,
            prefix: self.prefix.clone(),
            buffer: Default::default(),
        }
    }
}

/// Buffers partial lines so that the prefix is only emitted at the start of
/// each line, and so that whole lines from concurrent writers don't
/// interleave.
struct LineWriter {
    dest: OutputDest,
    kind: StreamKind,
    prefix: Option<Arc<str>>,
    buffer: String,
}

impl LineWriter {
    fn push(&mut self, s: &str) {
        if let OutputDest::Suppress = self.dest {
            return;
        }
        self.buffer.push_str(s);
        if let Some(last_newline) = self.buffer.rfind('\n') {
            let rest = self.buffer.split_off(last_newline + 1);
            let complete = std::mem::replace(&mut self.buffer, rest);
            self.emit(&complete);
        }
    }

    fn flush_partial(&mut self) {
        if !self.buffer.is_empty() {
            let partial = take(&mut self.buffer);
            self.emit(&partial);
        }
    }

    fn emit(&self, text: &str) {
        let rendered = match &self.prefix {
            None => text.to_string(),
            Some(prefix) => {
                let mut rendered = String::with_capacity(text.len());
                for line in text.split_inclusive('\n') {
                    rendered.push_str(prefix);
                    rendered.push_str(": ");
                    rendered.push_str(line);
                }
                rendered
            }
        };

        // Output is best-effort: a closed stdout (e.g. `| head`) must not
        // abort a test run.
        match (&self.dest, self.kind) {
            (OutputDest::Suppress, _) => {}
            (OutputDest::Stdout, StreamKind::Output) => {
                let mut handle = stdout().lock();
                let _ = handle.write_all(rendered.as_bytes());
                let _ = handle.flush();
            }
            (OutputDest::Stdout, StreamKind::Error) => {
                let mut handle = stderr().lock();
                let _ = handle.write_all(rendered.as_bytes());
                let _ = handle.flush();
            }
            (OutputDest::BufferForTest { stdout, stderr: _ }, StreamKind::Output) => {
                stdout
                    .lock()
                    .unwrap()
                    .extend_from_slice(rendered.as_bytes());
            }
            (OutputDest::BufferForTest { stdout: _, stderr }, StreamKind::Error) => {
                stderr
                    .lock()
                    .unwrap()
                    .extend_from_slice(rendered.as_bytes());
            }
        }
    }
}

impl Drop for LineWriter {
    fn drop(&mut self) {
        self.flush_partial();
    }
}

/// A handle to stdout.
pub struct OutputStream(LineWriter);

impl Write for OutputStream {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.push(s);
        Ok(())
    }
}

/// A handle to stderr.
pub struct ErrorStream(LineWriter);

impl Write for ErrorStream {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.push(s);
        Ok(())
    }
}

/// You probably don't want this. This implementation is only for `tracing`'s `fmt_layer`, because
/// it needs a writer of type `io::Write`, but `Effects` normally uses its implementation of
/// `fmt::Write`.
impl io::Write for ErrorStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.push(buf.to_str_lossy().as_ref());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush_partial();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fmt::Write;
    use std::sync::{Arc, Mutex};

    use super::{Effects, Glyphs};

    fn make_effects() -> (Effects, Arc<Mutex<Vec<u8>>>, Arc<Mutex<Vec<u8>>>) {
        let stdout: Arc<Mutex<Vec<u8>>> = Default::default();
        let stderr: Arc<Mutex<Vec<u8>>> = Default::default();
        let effects = Effects::new_from_buffer_for_test(Glyphs::text(), &stdout, &stderr);
        (effects, stdout, stderr)
    }

    fn contents(buffer: &Arc<Mutex<Vec<u8>>>) -> String {
        String::from_utf8(buffer.lock().unwrap().clone()).unwrap()
    }

    #[test]
    fn test_prefix_applies_to_each_line() -> eyre::Result<()> {
        let (effects, stdout, stderr) = make_effects();
        let effects = effects.with_prefix("build");
        write!(effects.get_output_stream(), "one\ntwo\n")?;
        writeln!(effects.get_error_stream(), "oops")?;

        insta::assert_snapshot!(contents(&stdout), @r###"
        build: one
        build: two
        "###);
        assert_eq!(contents(&stderr), "build: oops\n");
        Ok(())
    }

    #[test]
    fn test_partial_lines_are_joined_before_prefixing() -> eyre::Result<()> {
        let (effects, stdout, _stderr) = make_effects();
        let effects = effects.with_prefix("a").with_prefix("b");
        {
            let mut stream = effects.get_output_stream();
            write!(stream, "hello, ")?;
            write!(stream, "world\nand then")?;
        }
        assert_eq!(contents(&stdout), "a: b: hello, world\na: b: and then");
        Ok(())
    }

    #[test]
    fn test_suppress() -> eyre::Result<()> {
        let (effects, stdout, stderr) = make_effects();
        let effects = effects.suppress();
        writeln!(effects.get_output_stream(), "hidden")?;
        writeln!(effects.get_error_stream(), "hidden")?;
        assert!(contents(&stdout).is_empty());
        assert!(contents(&stderr).is_empty());
        Ok(())
    }
}
