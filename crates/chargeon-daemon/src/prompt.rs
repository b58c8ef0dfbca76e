//! Terminal prompts for learn mode

use std::io::{self, BufRead, Write};

use chargeon_core::learn::{LearnPrompt, RemoteButton};
use chargeon_core::outlet::OutletProfile;
use chargeon_core::protocol::ProtocolError;

/// Asks questions on stdout and reads answers from stdin
pub struct ConsolePrompt<R> {
    input: R,
}

impl ConsolePrompt<io::StdinLock<'static>> {
    pub fn stdin() -> Self {
        Self {
            input: io::stdin().lock(),
        }
    }
}

impl<R: BufRead> ConsolePrompt<R> {
    /// `true` for an empty answer or anything starting with `y`
    fn ask(&mut self, question: &str) -> bool {
        print!("{} [Y/n] ", question);
        let _ = io::stdout().flush();

        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) | Err(_) => false,
            Ok(_) => {
                let answer = line.trim().to_ascii_lowercase();
                answer.is_empty() || answer.starts_with('y')
            }
        }
    }
}

impl<R: BufRead> LearnPrompt for ConsolePrompt<R> {
    fn ready(&mut self, button: RemoteButton) -> bool {
        println!();
        println!("Learn outlet {} code", button);
        println!("  After answering, repeatedly press the remote control {} button", button);
        println!("  for the intended outlet. Some remotes keep sending while the");
        println!("  button is held down.");
        self.ask("Ready?")
    }

    fn capture_failed(&mut self, button: RemoteButton, error: &ProtocolError) -> bool {
        println!();
        println!("Unable to capture the outlet {} code ({})", button, error);
        println!("  It may help to press the button continuously or to move closer");
        println!("  to the ChargeOn module.");
        self.ask("Retry?")
    }

    fn confirm(&mut self, captured: &OutletProfile) -> bool {
        println!();
        println!("Outlet codes captured:");
        println!("  ON code       = {}", captured.on_code);
        println!("  OFF code      = {}", captured.off_code);
        println!("  Code length   = {}", captured.value_length);
        println!("  Protocol      = {}", captured.protocol);
        println!("  Pulse length  = {}", captured.pulse_length);
        self.ask("Replace current outlet values with the captured values?")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_answers() {
        let mut prompt = ConsolePrompt {
            input: Cursor::new("y\n\nno\nYES\n"),
        };
        assert!(prompt.ready(RemoteButton::On));
        assert!(prompt.ready(RemoteButton::Off));
        assert!(!prompt.capture_failed(RemoteButton::Off, &ProtocolError::CaptureFailed));
        assert!(prompt.confirm(&OutletProfile::default()));
        // End of input declines
        assert!(!prompt.ready(RemoteButton::On));
    }
}
