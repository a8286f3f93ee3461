//! Best-effort extractors for gdb console output.
//!
//! These parsers are deliberately shallow: a miss degrades the affected
//! variable to `supported = false`, it never kills a session. Do not grow
//! them into a grammar.

use std::sync::LazyLock;

use regex::Regex;

#[expect(clippy::unwrap_used)]
static FRAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r".+\s+((.+::)+)*([A-Za-z_0-9]+).*\s+\(.*\).+:(\d+)").unwrap());

#[expect(clippy::unwrap_used)]
static WHATIS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r".+=\s+(.+)\s+\(.+").unwrap());

#[expect(clippy::unwrap_used)]
static VARIABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(.+?)\s+([A-Za-z_][A-Za-z0-9_]*)\s*((?:\[[^\]]*\])*)$").unwrap()
});

#[expect(clippy::unwrap_used)]
static POINTER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\*").unwrap());

#[expect(clippy::unwrap_used)]
static DIMENSION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[(\d+)\]").unwrap());

#[expect(clippy::unwrap_used)]
static NAME_EQ_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*) =").unwrap());

/// Extract `(function, line)` from the console output of `frame`.
pub fn parse_frame(console: &str) -> Option<(String, u32)> {
    let caps = FRAME_RE.captures(console)?;
    let function = caps.get(3)?.as_str().to_string();
    let line = caps.get(4)?.as_str().parse().ok()?;
    Some((function, line))
}

/// Extract the return type from the console output of `whatis <function>`
/// (shaped like `type = int (void)`).
pub fn parse_return_type(console: &str) -> Option<String> {
    let caps = WHATIS_RE.captures(console)?;
    Some(caps.get(1)?.as_str().trim().to_string())
}

/// Extract the declared type from the console output of `whatis <variable>`
/// (shaped like `type = std::vector<int>`): everything after the first `=`.
pub fn parse_declared_type(console: &str) -> Option<String> {
    let (_, rest) = console.split_once('=')?;
    let ty = rest.trim();
    if ty.is_empty() { None } else { Some(ty.to_string()) }
}

/// Extract the value from the console output of `p <name>` (shaped like
/// `$1 = 5`): everything after the first `=`.
pub fn parse_value(console: &str) -> Option<String> {
    let (_, rest) = console.split_once('=')?;
    let value = rest.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Fixed-array dimensions from a type suffix (`int [3][4]` -> `[3, 4]`).
/// Scalars get `[1]`.
pub fn parse_dimensions(ty: &str) -> Vec<u32> {
    let dims: Vec<u32> = DIMENSION_RE
        .captures_iter(ty)
        .filter_map(|caps| caps.get(1)?.as_str().parse().ok())
        .collect();
    if dims.is_empty() { vec![1] } else { dims }
}

/// Normalize pointer declarators so `int *p` and `int* p` parse alike.
pub fn normalize_pointers(decl: &str) -> String {
    POINTER_RE.replace_all(decl, "* ").to_string()
}

/// Split one declaration line (`static int counter;`, `int arr[10];`) into
/// `(type, name, dimensions)`.
pub fn parse_declaration(line: &str) -> Option<(String, String, Vec<u32>)> {
    let line = normalize_pointers(line.trim().trim_end_matches(';'));
    let caps = VARIABLE_RE.captures(&line)?;
    let ty = caps.get(1)?.as_str().trim().to_string();
    let name = caps.get(2)?.as_str().to_string();
    let dims = parse_dimensions(caps.get(3).map(|m| m.as_str()).unwrap_or_default());
    Some((ty, name, dims))
}

/// Names reported by `info locals` / `info args` (`name = expr` lines).
pub fn parse_reported_names(console: &str) -> Vec<String> {
    console
        .lines()
        .filter_map(|line| {
            let caps = NAME_EQ_RE.captures(line)?;
            Some(caps.get(1)?.as_str().to_string())
        })
        .collect()
}

/// Declaration lines from `info variables` belonging to files under the
/// session's debug directory: everything between a matching `File ` header
/// and the next `File ` header or the `Non-debugging symbols:` trailer.
pub fn parse_global_declarations(console: &str, debug_dir_prefix: &str) -> Vec<String> {
    let mut collecting = false;
    let mut declarations = Vec::new();
    for line in console.lines() {
        if let Some(path) = line.strip_prefix("File ") {
            collecting = path.trim_end_matches(':').starts_with(debug_dir_prefix);
            continue;
        }
        if line.starts_with("Non-debugging symbols:") {
            collecting = false;
            continue;
        }
        if collecting && !line.trim().is_empty() {
            declarations.push(line.trim().to_string());
        }
    }
    declarations
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn frame_extracts_function_and_line() {
        let console = "#0  main () at /debug/4f2a.cpp:4\n";
        assert_eq!(parse_frame(console), Some(("main".to_string(), 4)));
    }

    #[test]
    fn frame_handles_qualified_names() {
        let console = "#1  util::math::gcd (a=12, b=8) at /debug/4f2a.cpp:17\n";
        assert_eq!(parse_frame(console), Some(("gcd".to_string(), 17)));
    }

    #[test]
    fn frame_miss_returns_none() {
        assert_eq!(parse_frame("No stack.\n"), None);
    }

    #[test]
    fn return_type_from_whatis() {
        assert_eq!(
            parse_return_type("type = int (void)\n"),
            Some("int".to_string())
        );
        assert_eq!(
            parse_return_type("type = std::string (int, int)\n"),
            Some("std::string".to_string())
        );
    }

    #[test]
    fn declared_type_takes_everything_after_the_equals() {
        assert_eq!(
            parse_declared_type("type = std::vector<int>\n"),
            Some("std::vector<int>".to_string())
        );
        assert_eq!(parse_declared_type("type = int [3][4]\n"), Some("int [3][4]".to_string()));
        assert_eq!(parse_declared_type("no equals here"), None);
    }

    #[test]
    fn value_is_text_after_first_equals() {
        assert_eq!(parse_value("$1 = 5\n"), Some("5".to_string()));
        assert_eq!(
            parse_value("$2 = {1, 2, 3}\n"),
            Some("{1, 2, 3}".to_string())
        );
    }

    #[test]
    fn dimensions_default_to_scalar() {
        assert_eq!(parse_dimensions("int"), vec![1]);
        assert_eq!(parse_dimensions("int [10]"), vec![10]);
        assert_eq!(parse_dimensions("char [3][4]"), vec![3, 4]);
    }

    #[test]
    fn pointer_normalisation_unifies_star_placement() {
        assert_eq!(normalize_pointers("int *p"), "int* p");
        assert_eq!(normalize_pointers("int*q"), "int* q");
    }

    #[test]
    fn declaration_lines_split_into_type_name_dims() {
        assert_eq!(
            parse_declaration("static int counter;"),
            Some(("static int".to_string(), "counter".to_string(), vec![1]))
        );
        assert_eq!(
            parse_declaration("int grid[3][4];"),
            Some(("int".to_string(), "grid".to_string(), vec![3, 4]))
        );
        assert_eq!(
            parse_declaration("char *name;"),
            Some(("char*".to_string(), "name".to_string(), vec![1]))
        );
        assert_eq!(parse_declaration(";"), None);
    }

    #[test]
    fn reported_names_come_from_name_eq_lines() {
        let console = "a = 1\nb = 2\nstd::vector of length 3 = {1, 2, 3}\n";
        assert_eq!(parse_reported_names(console), vec!["a", "b"]);
    }

    #[test]
    fn global_declarations_only_from_the_session_file_section() {
        let console = "All defined variables:\n\n\
            File /usr/include/c++/13/iostream:\n\
            static std::ios_base::Init __ioinit;\n\n\
            File /debug/4f2a.cpp:\n\
            static int counter;\n\
            int grid[3][4];\n\n\
            Non-debugging symbols:\n\
            0x0000000000001000  _init\n";
        assert_eq!(
            parse_global_declarations(console, "/debug"),
            vec!["static int counter;", "int grid[3][4];"]
        );
    }

    #[test]
    fn global_section_stops_at_next_file_header() {
        let console = "File /debug/a.cpp:\nint x;\nFile /other/b.cpp:\nint y;\n";
        assert_eq!(parse_global_declarations(console, "/debug"), vec!["int x;"]);
    }
}
