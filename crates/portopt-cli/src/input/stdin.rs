use serde_json::Value;
use std::io::{self, Read};

/// Pull piped JSON off stdin, if any. A TTY stdin or an empty pipe
/// yields `None` so commands fall back to flags or an input file.
pub fn read_stdin() -> Result<Option<Value>, Box<dyn std::error::Error>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }

    let mut raw = String::new();
    io::stdin()
        .lock()
        .read_to_string(&mut raw)
        .map_err(|e| format!("Failed to read stdin: {}", e))?;

    let body = raw.trim();
    if body.is_empty() {
        return Ok(None);
    }

    let value: Value =
        serde_json::from_str(body).map_err(|e| format!("Piped input is not valid JSON: {}", e))?;
    Ok(Some(value))
}
