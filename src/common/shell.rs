//! Shell utility functions
//!
//! Host commands are never run through a shell; these helpers only render
//! them for debug output, dry runs and error messages.

/// Escape a string for use in a shell command
///
/// This function quotes the string only if necessary (i.e., if it contains characters
/// that have special meaning in the shell). It uses single quotes for safety.
///
/// # Examples
///
/// ```ignore
/// use crate::common::shell::shell_quote;
///
/// assert_eq!(shell_quote("simple"), "simple");
/// assert_eq!(shell_quote("has spaces"), "'has spaces'");
/// assert_eq!(shell_quote("has'quote"), "'has'\\''quote'");
/// ```
pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }

    if s.chars().all(|c| {
        c.is_alphanumeric() || matches!(c, '-' | '_' | '=' | '/' | '.' | ':' | ',' | '+' | '@')
    }) {
        return s.to_string();
    }

    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Render a program and its arguments as a single copy-pasteable command line.
pub fn render_command<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(|a| a.as_ref()))
        .map(shell_quote)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("ada1p2"), "ada1p2");
        assert_eq!(shell_quote("/tmp/efi dir"), "'/tmp/efi dir'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote("--target=i386-pc"), "--target=i386-pc");
        assert_eq!(shell_quote("-n1:0:+260M"), "-n1:0:+260M");
    }

    #[test]
    fn test_render_command() {
        assert_eq!(render_command("zpool", &["list", "-H"]), "zpool list -H");
        assert_eq!(
            render_command("mount", &["-t", "msdosfs", "/dev/ada1p1", "/tmp/efi dir"]),
            "mount -t msdosfs /dev/ada1p1 '/tmp/efi dir'"
        );
        let empty: [&str; 0] = [];
        assert_eq!(render_command("true", &empty), "true");
    }
}
