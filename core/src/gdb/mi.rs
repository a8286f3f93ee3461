//! GDB machine-interface record parsing.
//!
//! MI output is line-oriented: each line carries a sigil that types the
//! record. `~"…"` is console text, `@"…"` target output, `&"…"` a log line,
//! `^…` a result, `*…`/`=…` async notifications, `(gdb)` the prompt. Lines
//! without a sigil are raw inferior output.

/// Result-record terminators the adapter synchronizes on after each command.
pub const TERMINATORS: [&str; 5] = ["^done", "^error", "^running", "^connected", "^exit"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Console,
    Output,
    Result,
    Notify,
    Log,
    Prompt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiRecord {
    pub kind: RecordKind,
    pub payload: String,
}

/// Parse one raw line into a record. Empty lines yield `None`.
pub fn parse_line(line: &str) -> Option<MiRecord> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.is_empty() {
        return None;
    }
    if line == "(gdb)" || line == "(gdb) " {
        return Some(MiRecord {
            kind: RecordKind::Prompt,
            payload: String::new(),
        });
    }
    let (kind, payload) = match line.as_bytes()[0] {
        b'~' => (RecordKind::Console, unquote(&line[1..])),
        b'@' => (RecordKind::Output, unquote(&line[1..])),
        b'&' => (RecordKind::Log, unquote(&line[1..])),
        b'^' => (RecordKind::Result, line.to_string()),
        b'*' | b'=' => (RecordKind::Notify, line[1..].to_string()),
        // No sigil: raw inferior output on the shared terminal.
        _ => (RecordKind::Output, line.to_string()),
    };
    Some(MiRecord { kind, payload })
}

/// Parse a captured buffer (everything between a command send and its
/// terminator) into records.
pub fn parse_records(buf: &str) -> Vec<MiRecord> {
    buf.lines().filter_map(parse_line).collect()
}

/// Concatenated payload of every console record.
pub fn console_text(records: &[MiRecord]) -> String {
    records
        .iter()
        .filter(|r| r.kind == RecordKind::Console)
        .map(|r| r.payload.as_str())
        .collect()
}

/// Payloads of every program-output record, joined with newlines. No
/// trailing newline is appended, so byte offsets into the result are stable
/// across repeated captures of a growing output file.
pub fn output_text(records: &[MiRecord]) -> String {
    records
        .iter()
        .filter(|r| r.kind == RecordKind::Output)
        .map(|r| r.payload.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Strip the surrounding quotes of a `"…"` payload and resolve the C-style
/// escapes gdb emits.
fn unquote(quoted: &str) -> String {
    let inner = quoted
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(quoted);
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => (),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn console_records_are_unescaped() {
        let record = parse_line("~\"Breakpoint 1 at 0x1169: file x.cpp, line 2.\\n\"").unwrap();
        assert_eq!(record.kind, RecordKind::Console);
        assert_eq!(record.payload, "Breakpoint 1 at 0x1169: file x.cpp, line 2.\n");
    }

    #[test]
    fn escaped_quotes_and_tabs_survive() {
        let record = parse_line(r#"~"a\t\"quoted\"\n""#).unwrap();
        assert_eq!(record.payload, "a\t\"quoted\"\n");
    }

    #[test]
    fn result_notify_log_and_prompt_are_classified() {
        assert_eq!(parse_line("^done").unwrap().kind, RecordKind::Result);
        assert_eq!(
            parse_line("*stopped,reason=\"breakpoint-hit\"").unwrap().kind,
            RecordKind::Notify
        );
        assert_eq!(
            parse_line("=thread-group-added,id=\"i1\"").unwrap().kind,
            RecordKind::Notify
        );
        assert_eq!(parse_line("&\"warning\\n\"").unwrap().kind, RecordKind::Log);
        assert_eq!(parse_line("(gdb)").unwrap().kind, RecordKind::Prompt);
    }

    #[test]
    fn unsigiled_lines_are_program_output() {
        let record = parse_line("42").unwrap();
        assert_eq!(record.kind, RecordKind::Output);
        assert_eq!(record.payload, "42");
    }

    #[test]
    fn carriage_returns_are_stripped() {
        let record = parse_line("^running\r").unwrap();
        assert_eq!(record.payload, "^running");
    }

    #[test]
    fn console_text_concatenates_in_order() {
        let records = parse_records("~\"line one\\n\"\n~\"line two\\n\"\n^done\n(gdb)\n");
        assert_eq!(console_text(&records), "line one\nline two\n");
    }

    #[test]
    fn output_text_collects_target_and_raw_lines() {
        let records = parse_records("@\"3\"\nraw output\n~\"not me\"\n");
        assert_eq!(output_text(&records), "3\nraw output");
    }
}
