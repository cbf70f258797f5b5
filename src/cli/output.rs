//! Colored terminal output for build progress
//!
//! Color follows the `NO_COLOR` / `FORCE_COLOR` conventions so CI logs stay
//! readable; everything else is decided by the terminal.

use std::io::Write;
use termcolor::{BufferWriter, Color, ColorChoice, ColorSpec, WriteColor};

/// Output manager for consistent colored terminal output
#[derive(Debug)]
pub struct OutputManager {
    bufwtr: BufferWriter,
    color: ColorChoice,
    verbose: bool,
    quiet: bool,
}

impl Clone for OutputManager {
    fn clone(&self) -> Self {
        Self::with_color(self.verbose, self.quiet, self.color)
    }
}

impl OutputManager {
    /// Create a new output manager, picking colors from the environment
    pub fn new(verbose: bool, quiet: bool) -> Self {
        Self::with_color(verbose, quiet, color_choice(|key| std::env::var_os(key).is_some()))
    }

    /// Create an output manager with an explicit color choice
    pub fn with_color(verbose: bool, quiet: bool, color: ColorChoice) -> Self {
        Self {
            bufwtr: BufferWriter::stdout(color),
            color,
            verbose,
            quiet,
        }
    }

    /// Print an info message (normal output)
    pub fn info(&self, message: &str) -> std::io::Result<()> {
        self.tagged("ℹ", ColorSpec::new().set_fg(Some(Color::Cyan)), message)
    }

    /// Print a success message
    pub fn success(&self, message: &str) -> std::io::Result<()> {
        self.tagged("✓", ColorSpec::new().set_fg(Some(Color::Green)).set_bold(true), message)
    }

    /// Print a warning message
    pub fn warn(&self, message: &str) -> std::io::Result<()> {
        if self.quiet {
            return Ok(());
        }

        let mut buffer = self.bufwtr.buffer();
        let _ = buffer.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)).set_bold(true));
        let _ = write!(&mut buffer, "Warning:");
        let _ = buffer.reset();
        let _ = buffer.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)));
        let _ = writeln!(&mut buffer, " {message}");
        let _ = buffer.reset();
        self.bufwtr.print(&buffer)
    }

    /// Print an error message to stderr (always shown)
    pub fn error(&self, message: &str) {
        let bufwtr = BufferWriter::stderr(self.color);
        let mut buffer = bufwtr.buffer();

        if buffer.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true)).is_err()
            || write!(&mut buffer, "✗").is_err()
            || buffer.reset().is_err()
            || buffer.set_color(ColorSpec::new().set_fg(Some(Color::Red))).is_err()
            || writeln!(&mut buffer, " {message}").is_err()
            || buffer.reset().is_err()
            || bufwtr.print(&buffer).is_err()
        {
            // Stderr failed - fallback to stdout as last resort
            println!("[STDERR ERROR] ✗ {message}");
        }
    }

    /// Print a debug message (only in verbose mode)
    pub fn verbose(&self, message: &str) -> std::io::Result<()> {
        if !self.verbose {
            return Ok(());
        }
        self.tagged("→", ColorSpec::new().set_fg(Some(Color::Blue)), message)
    }

    /// Print the start of a step
    pub fn progress(&self, message: &str) -> std::io::Result<()> {
        self.tagged("+", ColorSpec::new().set_fg(Some(Color::Magenta)).set_bold(true), message)
    }

    /// Print a section header
    pub fn section(&self, title: &str) -> std::io::Result<()> {
        if self.quiet {
            return Ok(());
        }

        let mut buffer = self.bufwtr.buffer();
        let _ = writeln!(&mut buffer);
        let _ = buffer.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)).set_bold(true));
        let _ = writeln!(&mut buffer, "═══ {title} ═══");
        let _ = buffer.reset();
        self.bufwtr.print(&buffer)
    }

    /// Print indented text (for sub-items)
    pub fn indent(&self, message: &str) -> std::io::Result<()> {
        self.println(&format!("    {message}"))
    }

    /// Print a plain message (respects quiet mode)
    pub fn println(&self, message: &str) -> std::io::Result<()> {
        if self.quiet {
            return Ok(());
        }

        let mut buffer = self.bufwtr.buffer();
        let _ = writeln!(&mut buffer, "{message}");
        self.bufwtr.print(&buffer)
    }

    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Check if quiet mode is enabled
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    fn tagged(&self, tag: &str, spec: &ColorSpec, message: &str) -> std::io::Result<()> {
        if self.quiet {
            return Ok(());
        }

        let mut buffer = self.bufwtr.buffer();
        let _ = buffer.set_color(spec);
        let _ = write!(&mut buffer, "{tag}");
        let _ = buffer.reset();
        let _ = writeln!(&mut buffer, " {message}");
        self.bufwtr.print(&buffer)
    }
}

/// `NO_COLOR` wins over `FORCE_COLOR`; otherwise let the terminal decide
fn color_choice(is_set: impl Fn(&str) -> bool) -> ColorChoice {
    if is_set("NO_COLOR") {
        ColorChoice::Never
    } else if is_set("FORCE_COLOR") {
        ColorChoice::Always
    } else {
        ColorChoice::Auto
    }
}
