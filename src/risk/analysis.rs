// ABOUTME: Shell command analysis — quote-aware splitting into sub-commands and word parsing.
// ABOUTME: Detects chaining, command substitution, privilege wrappers, and nested shell strings.

use std::path::Path;

/// A single sub-command of a parsed shell string (one executable with its arguments).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSegment {
    /// The segment text as written, trimmed of grouping punctuation.
    pub raw: String,
    /// The executable name after privilege wrappers and env assignments are peeled.
    pub executable: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Whether this segment receives a pipe (i.e. is a piped-to command).
    pub stdin_only: bool,
    /// Whether the segment runs under `sudo`/`doas`.
    pub elevated: bool,
    /// Whether extra arguments are read from stdin at run time (`xargs`).
    pub args_from_input: bool,
    /// Whether the segment came from inside a substitution or nested `sh -c` string.
    pub nested: bool,
}

impl CommandSegment {
    /// Basename of the executable, so `/usr/bin/rm` and `rm` compare equal.
    pub fn program(&self) -> &str {
        executable_name(&self.executable)
    }
}

/// The result of analyzing a shell command string.
#[derive(Debug, Clone, Default)]
pub struct ParsedCommand {
    /// All parsed segments across pipes, chains, and substitution bodies.
    pub segments: Vec<CommandSegment>,
    /// Whether a sequencing or pipe operator appears outside quotes.
    pub chained: bool,
    /// Whether `$(...)`, backticks, or process substitution appear outside single quotes.
    pub substitution: bool,
    /// Whether quoting or substitution was left unterminated.
    pub ambiguous: bool,
}

/// A command that runs the words after its own options and operands.
struct Runner {
    name: &'static str,
    /// Options that consume the following word.
    value_flags: &'static [&'static str],
    /// Positional operands ahead of the wrapped command, like `timeout`'s duration.
    operands: usize,
    /// Options whose value is a whole command string.
    script_flags: &'static [&'static str],
    elevates: bool,
}

const fn runner(name: &'static str, value_flags: &'static [&'static str], operands: usize) -> Runner {
    Runner {
        name,
        value_flags,
        operands,
        script_flags: &[],
        elevates: false,
    }
}

const RUNNERS: &[Runner] = &[
    Runner {
        elevates: true,
        ..runner("sudo", &["-u", "-g", "-C", "-h", "-p", "-U", "-r", "-t", "-D"], 0)
    },
    Runner {
        elevates: true,
        ..runner("doas", &["-u", "-C"], 0)
    },
    Runner {
        script_flags: &["-S", "--split-string"],
        ..runner("env", &["-u", "-C", "--unset", "--chdir"], 0)
    },
    runner("nohup", &[], 0),
    runner("command", &[], 0),
    runner("builtin", &[], 0),
    runner("exec", &["-a"], 0),
    runner("time", &["-f", "-o", "--format", "--output"], 0),
    runner("nice", &["-n", "--adjustment"], 0),
    runner("ionice", &["-c", "-n", "-p", "-P", "-u", "--class", "--classdata"], 0),
    runner("setsid", &[], 0),
    runner("stdbuf", &["-i", "-o", "-e"], 0),
    runner("unbuffer", &[], 0),
    runner("busybox", &[], 0),
    runner("timeout", &["-s", "-k", "--signal", "--kill-after"], 1),
    runner("watch", &["-n", "--interval"], 0),
    Runner {
        script_flags: &["-c", "--command"],
        ..runner("flock", &["-w", "-E", "--wait", "--timeout", "--conflict-exit-code"], 1)
    },
    runner("chroot", &["--userspec", "--groups"], 1),
    runner("taskset", &[], 1),
    runner("chrt", &[], 1),
    runner("strace", &["-o", "-e", "-p", "-s", "-u", "-E", "-a", "-b", "-P", "-I", "-X", "-O", "-S"], 0),
    runner("ltrace", &["-o", "-e", "-p", "-s", "-u", "-n", "-a"], 0),
    runner(
        "xargs",
        &["-I", "-n", "-P", "-L", "-s", "-d", "-E", "-a", "--max-args", "--max-procs", "--delimiter", "--arg-file"],
        0,
    ),
];

/// Shells whose `-c` argument is itself a command string.
const NESTED_SHELLS: &[&str] = &["sh", "bash", "zsh", "dash", "ksh", "fish"];

/// Basename of a possibly-absolute executable path.
pub fn executable_name(name: &str) -> &str {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(name)
}

/// Quote-aware word splitting that respects single quotes, double quotes, and backslash escaping.
///
/// Returns the words and whether every quote was closed.
pub fn shell_words(input: &str) -> (Vec<String>, bool) {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars().peekable();
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut has_word = false;

    while let Some(c) = chars.next() {
        if in_single_quote {
            if c == '\'' {
                in_single_quote = false;
            } else {
                current.push(c);
            }
        } else if in_double_quote {
            if c == '\\' {
                if let Some(&next) = chars.peek() {
                    chars.next();
                    current.push(next);
                }
            } else if c == '"' {
                in_double_quote = false;
            } else {
                current.push(c);
            }
        } else if c == '\\' {
            if let Some(&next) = chars.peek() {
                chars.next();
                current.push(next);
                has_word = true;
            }
        } else if c == '\'' {
            in_single_quote = true;
            has_word = true;
        } else if c == '"' {
            in_double_quote = true;
            has_word = true;
        } else if c.is_whitespace() {
            if has_word || !current.is_empty() {
                words.push(std::mem::take(&mut current));
                has_word = false;
            }
        } else {
            current.push(c);
        }
    }
    if has_word || !current.is_empty() {
        words.push(current);
    }
    (words, !in_single_quote && !in_double_quote)
}

/// One top-level piece of a command string, before word parsing.
struct RawPart {
    text: String,
    piped: bool,
}

/// Close the current part; `piped_next` marks whether the following part reads a pipe.
fn flush(current: &mut String, piped_next: bool, parts: &mut Vec<RawPart>, next_piped: &mut bool) {
    parts.push(RawPart {
        text: std::mem::take(current),
        piped: *next_piped,
    });
    *next_piped = piped_next;
}

/// Output of the top-level splitter.
struct Split {
    parts: Vec<RawPart>,
    chained: bool,
    balanced: bool,
}

/// Split a command string on `;`, newline, `&&`, `||`, `|`, `|&`, and background `&`.
///
/// Operators inside quotes, `$(...)`, or backticks do not split. Redirections such as
/// `2>&1` and `&>` are kept intact.
fn split_top_level(input: &str) -> Split {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chained = false;
    let mut next_piped = false;
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut in_backtick = false;
    let mut depth = 0usize;
    let mut prev: Option<char> = None;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if in_single_quote {
            current.push(c);
            if c == '\'' {
                in_single_quote = false;
            }
        } else if c == '\\' {
            current.push(c);
            if let Some(next) = chars.next() {
                current.push(next);
            }
        } else if in_backtick {
            current.push(c);
            if c == '`' {
                in_backtick = false;
            }
        } else if c == '`' {
            in_backtick = true;
            current.push(c);
        } else if matches!(c, '$' | '<' | '>') && chars.peek() == Some(&'(') {
            current.push(c);
            if let Some(open) = chars.next() {
                current.push(open);
            }
            depth += 1;
        } else if depth > 0 {
            current.push(c);
            if c == '(' {
                depth += 1;
            } else if c == ')' {
                depth -= 1;
            }
        } else if in_double_quote {
            current.push(c);
            if c == '"' {
                in_double_quote = false;
            }
        } else if c == '\'' {
            in_single_quote = true;
            current.push(c);
        } else if c == '"' {
            in_double_quote = true;
            current.push(c);
        } else if c == '&' {
            if chars.peek() == Some(&'&') {
                chars.next();
                chained = true;
                flush(&mut current, false, &mut parts, &mut next_piped);
            } else if matches!(prev, Some('>') | Some('<')) || chars.peek() == Some(&'>') {
                current.push(c);
            } else {
                chained = true;
                flush(&mut current, false, &mut parts, &mut next_piped);
            }
        } else if c == '|' {
            if prev == Some('>') {
                current.push(c);
            } else if chars.peek() == Some(&'|') {
                chars.next();
                chained = true;
                flush(&mut current, false, &mut parts, &mut next_piped);
            } else {
                if chars.peek() == Some(&'&') {
                    chars.next();
                }
                chained = true;
                flush(&mut current, true, &mut parts, &mut next_piped);
            }
        } else if c == ';' || c == '\n' {
            chained = true;
            flush(&mut current, false, &mut parts, &mut next_piped);
        } else {
            current.push(c);
        }
        prev = Some(c);
    }
    if !current.trim().is_empty() {
        parts.push(RawPart {
            text: current,
            piped: next_piped,
        });
    }

    Split {
        parts,
        chained,
        balanced: !in_single_quote && !in_double_quote && !in_backtick && depth == 0,
    }
}

/// Extract the bodies of `$(...)`, `<(...)`, `>(...)`, and backtick substitutions.
///
/// Returns the bodies and whether every substitution was terminated.
pub fn substitution_bodies(input: &str) -> (Vec<String>, bool) {
    let chars: Vec<char> = input.chars().collect();
    let mut bodies = Vec::new();
    let mut balanced = true;
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if in_single_quote {
            if c == '\'' {
                in_single_quote = false;
            }
            i += 1;
            continue;
        }
        match c {
            '\\' => {
                i += 2;
                continue;
            }
            '\'' if !in_double_quote => in_single_quote = true,
            '"' => in_double_quote = !in_double_quote,
            '`' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != '`' {
                    end += if chars[end] == '\\' { 2 } else { 1 };
                }
                if end >= chars.len() {
                    balanced = false;
                    bodies.push(chars[start.min(chars.len())..].iter().collect());
                    break;
                }
                bodies.push(chars[start..end].iter().collect());
                i = end + 1;
                continue;
            }
            '$' | '<' | '>' if chars.get(i + 1) == Some(&'(') => {
                let start = i + 2;
                let mut depth = 1usize;
                let mut end = start;
                while end < chars.len() {
                    match chars[end] {
                        '(' => depth += 1,
                        ')' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    end += 1;
                }
                if depth > 0 {
                    balanced = false;
                    bodies.push(chars[start.min(chars.len())..].iter().collect());
                    break;
                }
                bodies.push(chars[start..end].iter().collect());
                i = end + 1;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    (bodies, balanced && !in_single_quote)
}

/// What peeling wrappers off the front of a word list found.
#[derive(Debug, Default)]
struct Peeled {
    /// Index of the real executable.
    start: usize,
    elevated: bool,
    args_from_input: bool,
    /// A command string handed to a wrapper option such as `env -S` or `flock -c`.
    script: Option<String>,
}

/// Peel env assignments and runner commands from the front of a word list.
fn peel_wrappers(words: &[String]) -> Peeled {
    let mut peeled = Peeled::default();
    let mut idx = 0;
    while idx < words.len() {
        let word = words[idx].as_str();
        if is_env_assignment(word) {
            idx += 1;
            continue;
        }
        let name = executable_name(word);
        let Some(runner) = RUNNERS.iter().find(|r| r.name == name) else {
            break;
        };
        peeled.elevated |= runner.elevates;
        peeled.args_from_input |= runner.name == "xargs";
        idx += 1;

        let mut operands = runner.operands;
        let mut options_done = false;
        while idx < words.len() {
            let word = words[idx].as_str();
            if !options_done && word == "--" {
                options_done = true;
                idx += 1;
            } else if !options_done && word.starts_with('-') {
                if runner.script_flags.contains(&word) {
                    peeled.script = words.get(idx + 1).cloned();
                    peeled.start = words.len();
                    return peeled;
                }
                idx += if runner.value_flags.contains(&word) { 2 } else { 1 };
            } else if operands > 0 {
                operands -= 1;
                idx += 1;
            } else {
                break;
            }
        }
    }
    peeled.start = idx.min(words.len());
    peeled
}

fn is_env_assignment(word: &str) -> bool {
    let Some((name, _)) = word.split_once('=') else {
        return false;
    };
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Strip subshell and brace-group punctuation from the edges of a segment.
///
/// Closing characters are only removed while unmatched, so `${HOME}` survives.
fn trim_grouping(text: &str) -> &str {
    let mut text = text.trim().trim_start_matches(['(', '{', '!', ' ', '\t']);
    loop {
        let trimmed = text.trim_end();
        let unmatched = |open: char, close: char| {
            trimmed.ends_with(close) && trimmed.matches(open).count() < trimmed.matches(close).count()
        };
        if unmatched('(', ')') || unmatched('{', '}') {
            text = &trimmed[..trimmed.len() - 1];
        } else {
            return trimmed;
        }
    }
}

/// Parse a shell command string into segments, recursing into substitutions
/// and nested `sh -c` strings.
pub fn parse_command(command: &str) -> ParsedCommand {
    let mut parsed = ParsedCommand::default();
    parse_into(command, false, 0, &mut parsed);
    parsed
}

const MAX_NESTING: usize = 8;

fn parse_into(command: &str, nested: bool, level: usize, parsed: &mut ParsedCommand) {
    if level > MAX_NESTING {
        parsed.ambiguous = true;
        return;
    }

    let split = split_top_level(command);
    parsed.chained |= split.chained;
    if !split.balanced {
        parsed.ambiguous = true;
    }

    let (bodies, bodies_balanced) = substitution_bodies(command);
    if !bodies.is_empty() {
        parsed.substitution = true;
    }
    if !bodies_balanced {
        parsed.ambiguous = true;
    }

    for part in &split.parts {
        let text = trim_grouping(&part.text);
        if text.is_empty() {
            continue;
        }
        let (words, balanced) = shell_words(text);
        if !balanced {
            parsed.ambiguous = true;
        }
        let peeled = peel_wrappers(&words);
        if let Some(script) = &peeled.script {
            parse_into(script, true, level + 1, parsed);
            continue;
        }
        let Some(executable) = words.get(peeled.start) else {
            continue;
        };
        // `watch "rm -rf /"` hands the runner one quoted command line.
        if peeled.start > 0 && executable.contains(char::is_whitespace) {
            parse_into(&words[peeled.start..].join(" "), true, level + 1, parsed);
            continue;
        }
        let segment = CommandSegment {
            raw: text.to_string(),
            executable: executable.clone(),
            args: words[peeled.start + 1..].to_vec(),
            stdin_only: part.piped,
            elevated: peeled.elevated,
            args_from_input: peeled.args_from_input,
            nested,
        };

        let inner = nested_shell_script(&segment);
        parsed.segments.push(segment);
        if let Some(script) = inner {
            parse_into(&script, true, level + 1, parsed);
        }
    }

    for body in bodies {
        parse_into(&body, true, level + 1, parsed);
    }
}

/// The script passed to `sh -c`/`bash -c` or `eval`, if any.
fn nested_shell_script(segment: &CommandSegment) -> Option<String> {
    let program = segment.program();
    if program == "eval" {
        return (!segment.args.is_empty()).then(|| segment.args.join(" "));
    }
    if !NESTED_SHELLS.contains(&program) {
        return None;
    }
    let pos = segment
        .args
        .iter()
        .position(|a| a.starts_with('-') && !a.starts_with("--") && a.contains('c'))?;
    segment.args.get(pos + 1).cloned()
}
