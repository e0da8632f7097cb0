//! Serial console of the simulated machine.
//! Provides thread-safe access to write formatted text to the console line by line.

use arrayvec::ArrayString;
use core::fmt;
use spin::Mutex;

/// Longest line the console buffers before forcing it out.
pub const CONSOLE_LINE_MAX: usize = 256;

/// Receives each completed console line.
pub type ConsoleSink = fn(&str);

/// Thread-safe console shared by every printer in the kernel.
pub static CONSOLE: Mutex<Console> = Mutex::new(Console::new());

/// Line-buffered console. Output goes nowhere until a sink is installed.
pub struct Console {
    line: ArrayString<CONSOLE_LINE_MAX>,
    sink: Option<ConsoleSink>,
    lines_written: usize,
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Console {
    pub const fn new() -> Self {
        Console {
            line: ArrayString::new_const(),
            sink: None,
            lines_written: 0,
        }
    }

    /// Installs the sink that receives completed lines, replacing any previous one.
    pub fn set_sink(&mut self, sink: ConsoleSink) {
        self.sink = Some(sink);
    }

    /// Number of lines pushed out since boot.
    pub fn lines_written(&self) -> usize {
        self.lines_written
    }

    fn flush_line(&mut self) {
        if let Some(sink) = self.sink {
            sink(self.line.as_str());
        }
        self.line.clear();
        self.lines_written += 1;
    }
}

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            if c == '\n' {
                self.flush_line();
                continue;
            }
            if self.line.try_push(c).is_err() {
                self.flush_line();
                self.line.push(c);
            }
        }
        Ok(())
    }
}

/// Installs the console sink.
pub fn set_sink(sink: ConsoleSink) {
    CONSOLE.lock().set_sink(sink);
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;
    CONSOLE
        .lock()
        .write_fmt(args)
        .expect("Printing to console failed");
}

/// Prints formatted text to the serial console.
///
/// # Examples
/// ```
/// mipsvm::serial_print!("Hello {}", "World");
/// ```
#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!($($arg)*))
    };
}

/// Prints formatted text to the serial console, followed by a newline.
///
/// # Examples
/// ```
/// mipsvm::serial_println!("Hello {}", "World");
/// ```
#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => ($crate::serial_print!("{}\n", format_args!($($arg)*)));
}
