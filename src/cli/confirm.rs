use std::io::{self, BufRead, Write};

/// Asks a yes/no question on the terminal. Only an explicit yes agrees.
pub fn confirm(question: &str) -> bool {
    confirm_with(question, io::stdin().lock(), io::stdout())
}

fn confirm_with(question: &str, mut input: impl BufRead, mut output: impl Write) -> bool {
    if write!(output, "{question} [y/N] ")
        .and_then(|_| output.flush())
        .is_err()
    {
        return false;
    }
    let mut answer = String::new();
    if input.read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
