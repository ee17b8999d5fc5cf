//! Command-line argument parsing.
//!
//! Usage:
//!   lang [-hdl] [-L<dir>] [-e<code>] [<file>|-] [args...]
//!
//! Everything after the script (or after `-e<code>`) goes to `&LANG_ARGS`.

use std::path::PathBuf;

use directories::ProjectDirs;

pub const USAGE: &str = "Usage: lang [-hdl] [-L<dir>] [-e<code>] [<file>|-] [args...]";

/// Env var holding extra library directories (path-list syntax).
pub const LIB_DIR_ENV: &str = "LANG_LIB_DIR";

// ── Public types ──────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Default)]
pub struct CliArgs {
    /// Library directories from `-L<dir>`, in order.
    pub libdirs: Vec<PathBuf>,
    /// Where the script comes from.
    pub source: Source,
    /// Print the module scope's translation map afterwards (`-l`).
    pub print_translations: bool,
    /// Debug logging (`-d`).
    pub debug: bool,
    /// Show usage and exit (`-h`).
    pub help: bool,
    /// Bound to `&LANG_ARGS`.
    pub script_args: Vec<String>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub enum Source {
    /// No file given, or `-`.
    #[default]
    Stdin,
    File(PathBuf),
    /// `-e<code>`.
    Code(String),
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse `std::env::args()` and return [`CliArgs`] or an error message.
pub fn parse_args() -> Result<CliArgs, String> {
    let raw: Vec<String> = std::env::args().collect();
    parse_argv(raw.get(1..).unwrap_or_default())
}

/// Parse a slice of argument strings (exposed for testing).
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_str();

        if arg == "--" {
            i += 1;
            break;
        }
        if !arg.starts_with('-') || arg == "-" {
            break;
        }

        let chars: Vec<char> = arg[1..].chars().collect();
        let mut j = 0;
        while j < chars.len() {
            match chars[j] {
                'h' => args.help = true,
                'd' => args.debug = true,
                'l' => args.print_translations = true,

                // -L<dir> or -L <dir>
                'L' | 'e' => {
                    let flag = chars[j];
                    let value = if j + 1 < chars.len() {
                        let s: String = chars[j + 1..].iter().collect();
                        j = chars.len();
                        s
                    } else if i + 1 < argv.len() {
                        i += 1;
                        argv[i].clone()
                    } else {
                        return Err(format!("-{flag} requires an argument"));
                    };
                    if flag == 'L' {
                        args.libdirs.push(PathBuf::from(value));
                    } else {
                        args.source = Source::Code(value);
                    }
                }

                c => return Err(format!("unknown option: -{c}")),
            }
            j += 1;
        }
        i += 1;
    }

    let mut rest = argv.get(i..).unwrap_or_default().iter().cloned();
    if !matches!(args.source, Source::Code(_)) {
        args.source = match rest.next() {
            None => Source::Stdin,
            Some(f) if f == "-" => Source::Stdin,
            Some(f) => Source::File(PathBuf::from(f)),
        };
    }
    args.script_args = rest.collect();

    Ok(args)
}

// ── Path helpers ──────────────────────────────────────────────────────────────

/// Library directories for `linker.include` and friends.
///
/// Priority: `-L<dir>` flags → `LANG_LIB_DIR` → the platform data
/// directory (`<data>/lang/lib`).  Only the last is filtered for existence.
pub fn resolve_libdirs(cli_dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut dirs = cli_dirs.to_vec();
    if let Some(env) = std::env::var_os(LIB_DIR_ENV) {
        dirs.extend(std::env::split_paths(&env).filter(|p| !p.as_os_str().is_empty()));
    }
    if let Some(project) = ProjectDirs::from("", "", "lang") {
        let lib = project.data_dir().join("lib");
        if lib.is_dir() {
            dirs.push(lib);
        }
    }
    dirs
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|&s| s.to_owned()).collect()
    }

    #[test]
    fn empty_args_read_stdin() {
        let a = parse_argv(&argv(&[])).unwrap();
        assert_eq!(a.source, Source::Stdin);
        assert!(a.script_args.is_empty());
    }

    #[test]
    fn file_and_script_args() {
        let a = parse_argv(&argv(&["main.lang", "one", "-d"])).unwrap();
        assert_eq!(a.source, Source::File(PathBuf::from("main.lang")));
        assert_eq!(a.script_args, vec!["one", "-d"]);
        assert!(!a.debug);
    }

    #[test]
    fn dash_is_stdin() {
        let a = parse_argv(&argv(&["-", "x"])).unwrap();
        assert_eq!(a.source, Source::Stdin);
        assert_eq!(a.script_args, vec!["x"]);
    }

    #[test]
    fn combined_bool_flags() {
        let a = parse_argv(&argv(&["-dlh"])).unwrap();
        assert!(a.debug && a.print_translations && a.help);
    }

    #[test]
    fn code_embedded_and_separate() {
        let a = parse_argv(&argv(&["-efunc.println(hi)", "arg"])).unwrap();
        assert_eq!(a.source, Source::Code("func.println(hi)".to_owned()));
        assert_eq!(a.script_args, vec!["arg"]);

        let a = parse_argv(&argv(&["-e", "return 1"])).unwrap();
        assert_eq!(a.source, Source::Code("return 1".to_owned()));
    }

    #[test]
    fn libdirs_accumulate() {
        let a = parse_argv(&argv(&["-L/a", "-L", "/b", "x.lang"])).unwrap();
        assert_eq!(a.libdirs, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }

    #[test]
    fn double_dash_ends_flags() {
        let a = parse_argv(&argv(&["--", "-weird.lang"])).unwrap();
        assert_eq!(a.source, Source::File(PathBuf::from("-weird.lang")));
    }

    #[test]
    fn missing_values_and_unknown_flags() {
        assert!(parse_argv(&argv(&["-L"])).is_err());
        assert!(parse_argv(&argv(&["-e"])).is_err());
        assert!(parse_argv(&argv(&["-z"])).is_err());
    }

    #[test]
    fn cli_dirs_come_first() {
        let dirs = resolve_libdirs(&[PathBuf::from("/first")]);
        assert_eq!(dirs[0], PathBuf::from("/first"));
    }
}
