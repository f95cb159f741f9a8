// ABOUTME: The ordered command rule table — (matcher, risk level, reason) rows in priority order.
// ABOUTME: Adding a rule is a new row here; the classifier never special-cases strings itself.

use std::sync::LazyLock;

use regex::Regex;

use super::analysis::{CommandSegment, executable_name};
use super::types::RiskLevel;

/// A predicate over one parsed sub-command.
pub type SegmentPredicate = fn(&CommandSegment) -> bool;

/// What a rule is tested against.
#[derive(Clone, Copy)]
pub enum Matcher {
    /// Regex over the normalized segment (`program arg arg`, wrappers peeled).
    Text(&'static str),
    /// Regex over the segment as written, including redirections.
    Raw(&'static str),
    /// Regex over the whole command string, for patterns that span operators.
    Whole(&'static str),
    /// Structural check over the parsed segment.
    Predicate(SegmentPredicate),
}

/// One row of the rule table.
#[derive(Clone, Copy)]
pub struct CommandRule {
    pub name: &'static str,
    pub matcher: Matcher,
    pub risk: RiskLevel,
    pub reason: &'static str,
}

const fn rule(name: &'static str, matcher: Matcher, risk: RiskLevel, reason: &'static str) -> CommandRule {
    CommandRule {
        name,
        matcher,
        risk,
        reason,
    }
}

/// Built-in rules, highest priority first. The first matching row decides a segment.
pub const COMMAND_RULES: &[CommandRule] = &[
    // Blocked: terminal, never approvable.
    rule(
        "fork-bomb",
        Matcher::Whole(r":\s*\(\s*\)\s*\{[^}]*:\s*\|\s*:[^}]*\}"),
        RiskLevel::Blocked,
        "fork bomb",
    ),
    rule(
        "recursive-delete-broad",
        Matcher::Predicate(is_broad_recursive_delete),
        RiskLevel::Blocked,
        "recursive delete of a root, home, or system path, or of paths read from input",
    ),
    rule(
        "find-delete-broad",
        Matcher::Predicate(is_broad_find_delete),
        RiskLevel::Blocked,
        "find that deletes across a root, home, or system path",
    ),
    rule(
        "raw-disk-write",
        Matcher::Predicate(is_raw_disk_write),
        RiskLevel::Blocked,
        "raw write to a block device or filesystem creation",
    ),
    rule(
        "device-redirect",
        Matcher::Raw(r">\s*/dev/(?:sd[a-z]|nvme\d|hd[a-z]|xvd[a-z]|vd[a-z]|mmcblk\d|disk\d|rdisk\d)"),
        RiskLevel::Blocked,
        "redirect onto a block device",
    ),
    rule(
        "recursive-permission-root",
        Matcher::Predicate(is_recursive_permission_change_at_root),
        RiskLevel::Blocked,
        "recursive permission or ownership change at a root path",
    ),
    rule(
        "elevated-destructive",
        Matcher::Predicate(is_elevated_destructive),
        RiskLevel::Blocked,
        "destructive operation under elevated privileges",
    ),
    rule(
        "system-path-redirect",
        Matcher::Raw(
            r#"(?:>>?|\btee\b(?:\s+-a)?)\s*["']?(?:/etc/|/boot/|/usr/|/bin/|/sbin/|/lib/|/lib64/|/sys/|/proc/sys/|/System/|~/\.ssh/|\$HOME/\.ssh/)"#,
        ),
        RiskLevel::Blocked,
        "write into a sensitive system path",
    ),
    rule(
        "system-path-copy",
        Matcher::Predicate(is_system_path_copy),
        RiskLevel::Blocked,
        "copy or move into a sensitive system path",
    ),
    // High: irreversible or externally visible, approvable.
    rule(
        "git-force-push",
        Matcher::Text(
            r"^git\s+(?:-[cC]\s+\S+\s+|--\S+\s+)*push\b.*(?:\s--force(?:-with-lease|-if-includes)?\b|\s-[a-zA-Z]*f\b|\s\+\S+)",
        ),
        RiskLevel::High,
        "force push rewrites remote history",
    ),
    rule(
        "package-publish",
        Matcher::Text(
            r"^(?:(?:npm|yarn|pnpm|bun|cargo|poetry)\s+publish\b|twine\s+upload\b|gem\s+push\b|docker\s+push\b|mvn\s+deploy\b|gh\s+release\s+create\b)",
        ),
        RiskLevel::High,
        "publishes a package or artifact",
    ),
    rule(
        "git-discard",
        Matcher::Text(
            r"^git\s+(?:reset\s+.*--hard|clean\s+-[a-zA-Z]*f|checkout\s+(?:--\s+)?\.\s*$|restore\s+\.|branch\s+-D|stash\s+(?:drop|clear)|filter-branch|reflog\s+expire)",
        ),
        RiskLevel::High,
        "discards uncommitted work or history",
    ),
    rule(
        "recursive-delete",
        Matcher::Predicate(is_recursive_delete),
        RiskLevel::High,
        "recursive delete",
    ),
    rule(
        "pipe-to-shell",
        Matcher::Predicate(runs_piped_input),
        RiskLevel::High,
        "pipes content into an interpreter",
    ),
    rule(
        "privileged",
        Matcher::Predicate(is_elevated),
        RiskLevel::High,
        "runs with elevated privileges",
    ),
    rule(
        "destructive-sql",
        Matcher::Raw(r"(?i)\b(?:drop\s+(?:database|table|schema)|truncate\s+table)\b"),
        RiskLevel::High,
        "destructive database statement",
    ),
    rule(
        "system-power",
        Matcher::Text(r"^(?:shutdown|reboot|halt|poweroff)\b|^(?:systemctl\s+(?:poweroff|reboot|halt))\b|^crontab\s+-r\b"),
        RiskLevel::High,
        "changes system power state or drops scheduled jobs",
    ),
    // Medium: mutating but recoverable.
    rule(
        "package-install",
        Matcher::Text(
            r"^(?:(?:npm|yarn|pnpm|bun)\s+(?:install|i|add|remove|uninstall|update)|pip3?\s+(?:install|uninstall)|cargo\s+(?:install|add|remove|update)|(?:apt|apt-get|dnf|yum|brew|pacman|apk|zypper)\s+(?:install|remove|upgrade|purge|update|-S\S*)|go\s+(?:install|get)|gem\s+install)\b",
        ),
        RiskLevel::Medium,
        "installs or removes packages",
    ),
    rule(
        "network-transfer",
        Matcher::Text(r"^(?:curl|wget|scp|sftp|ftp|rsync|ssh|nc|ncat|telnet)\b"),
        RiskLevel::Medium,
        "network transfer",
    ),
    rule(
        "git-mutate",
        Matcher::Text(r"^git\s+(?:-[cC]\s+\S+\s+|--\S+\s+)*(?:(?:commit|merge|rebase|cherry-pick|revert|am|apply|push|pull|checkout|switch)\b|tag\s+-d\b|stash(?:\s+(?:push|pop|apply|save)\b|\s*$|\s+-))"),
        RiskLevel::Medium,
        "modifies the repository",
    ),
    rule(
        "file-delete",
        Matcher::Text(r"^(?:rm|rmdir|unlink|shred|truncate)\b"),
        RiskLevel::Medium,
        "deletes or truncates files",
    ),
    rule(
        "find-mutate",
        Matcher::Predicate(is_mutating_find),
        RiskLevel::Medium,
        "find that deletes or executes per match",
    ),
    rule(
        "permission-change",
        Matcher::Text(r"^(?:chmod|chown|chgrp)\b"),
        RiskLevel::Medium,
        "changes file permissions or ownership",
    ),
    rule(
        "process-signal",
        Matcher::Text(r"^(?:kill|pkill|killall)\b"),
        RiskLevel::Medium,
        "signals running processes",
    ),
    rule(
        "container-orchestration",
        Matcher::Text(r"^(?:docker\s+(?:run|rm|rmi|exec|compose)|kubectl\s+(?:apply|delete|exec|scale|rollout))\b"),
        RiskLevel::Medium,
        "changes containers or cluster state",
    ),
    // Output redirection demotes an otherwise read-only command to the default tier.
    rule(
        "file-redirect",
        Matcher::Predicate(writes_via_redirect),
        RiskLevel::Low,
        "redirects output into a file",
    ),
    // Safe allowlist: informational and read-only.
    rule(
        "git-read-only",
        Matcher::Text(
            r"^git\s+(?:--no-pager\s+)?(?:status|diff|log|show|blame|ls-files|ls-tree|rev-parse|describe|shortlog|grep|remote(?:\s+-v)?\s*$|branch(?:\s+(?:-a|-r|-v|-vv|--list))*\s*$|tag\s*$|tag\s+-l|stash\s+list|config\s+--get|fetch\s+--dry-run)\b",
        ),
        RiskLevel::Safe,
        "read-only git query",
    ),
    rule(
        "dependency-query",
        Matcher::Text(
            r"^(?:npm\s+(?:ls|list|outdated|view|info|audit)|yarn\s+(?:list|why|info|outdated)|pnpm\s+(?:ls|list|outdated|why)|cargo\s+(?:tree|metadata|search|--version|-V)|pip3?\s+(?:list|show|freeze)|go\s+(?:list|version|env)|gem\s+list|bundle\s+(?:list|outdated)|composer\s+show|poetry\s+show)\b",
        ),
        RiskLevel::Safe,
        "dependency query",
    ),
    rule(
        "version-query",
        Matcher::Text(r"^\S+\s+(?:--version|-V|version)\s*$"),
        RiskLevel::Safe,
        "version query",
    ),
    rule(
        "read-only-program",
        Matcher::Predicate(is_read_only_program),
        RiskLevel::Safe,
        "read-only command",
    ),
];

/// Programs that only read state or print output.
pub const READ_ONLY_PROGRAMS: &[&str] = &[
    "basename", "cat", "cksum", "cmp", "column", "comm", "cut", "date", "df", "diff", "dirname",
    "du", "echo", "egrep", "fgrep", "file", "fold", "free", "grep", "head", "hostname", "id", "jq",
    "less", "ls", "md5sum", "more", "nl", "od", "printenv", "printf", "ps", "pwd", "readlink",
    "realpath", "rg", "seq", "sha1sum", "sha256sum", "sort", "stat", "strings", "tail", "test",
    "tr", "tree", "true", "false", "type", "uname", "uniq", "uptime", "wc", "which", "whoami",
    "xxd", "yq",
];

/// Programs whose misuse with privileges is destructive.
const DESTRUCTIVE_PROGRAMS: &[&str] = &[
    "rm", "rmdir", "dd", "shred", "wipefs", "fdisk", "sfdisk", "parted", "chmod", "chown",
    "chgrp", "truncate", "mv", "find", "mkswap",
];

/// Top-level directories whose wholesale removal wrecks the system.
const SYSTEM_ROOTS: &[&str] = &[
    "/bin", "/boot", "/dev", "/etc", "/home", "/lib", "/lib64", "/opt", "/proc", "/root", "/sbin",
    "/srv", "/sys", "/usr", "/var", "/Users", "/System", "/Applications", "/Library",
];

/// Destinations that must never be written by a copy, move, or link.
const SYSTEM_WRITE_PREFIXES: &[&str] = &[
    "/etc/", "/boot/", "/usr/", "/bin/", "/sbin/", "/lib/", "/lib64/", "/sys/", "/System/",
    "~/.ssh/", "$HOME/.ssh/",
];

fn targets(segment: &CommandSegment) -> impl Iterator<Item = &str> {
    let mut after_double_dash = false;
    segment.args.iter().filter_map(move |arg| {
        if after_double_dash {
            return Some(arg.as_str());
        }
        if arg == "--" {
            after_double_dash = true;
            return None;
        }
        (!arg.starts_with('-')).then_some(arg.as_str())
    })
}

fn has_recursive_flag(segment: &CommandSegment) -> bool {
    segment.args.iter().any(|arg| {
        arg == "--recursive"
            || (arg.starts_with('-') && !arg.starts_with("--") && arg.contains(['r', 'R']))
    })
}

/// A target with quotes, a trailing glob, and trailing slashes removed.
fn target_base(target: &str) -> &str {
    let trimmed = target.trim_matches(['"', '\'']);
    let base = trimmed
        .strip_suffix("/*")
        .or_else(|| trimmed.strip_suffix("/."))
        .unwrap_or(trimmed);
    if base.len() > 1 { base.trim_end_matches('/') } else { base }
}

/// A delete target that covers the filesystem root, a home directory, the working
/// directory wholesale, or a top-level system directory.
pub fn is_broad_target(target: &str) -> bool {
    let base = target_base(target);
    matches!(
        base,
        "" | "/" | "*" | ".*" | "." | ".." | "~" | "$HOME" | "${HOME}"
    ) || SYSTEM_ROOTS.contains(&base)
}

fn is_system_root(target: &str) -> bool {
    let base = target_base(target);
    base == "/" || SYSTEM_ROOTS.contains(&base)
}

/// `rm -r` is broad when a target is, or when `xargs` supplies targets nobody can see yet.
fn is_broad_recursive_delete(segment: &CommandSegment) -> bool {
    if segment.program() != "rm" {
        return false;
    }
    if segment.args.iter().any(|a| a == "--no-preserve-root") {
        return true;
    }
    has_recursive_flag(segment) && (segment.args_from_input || targets(segment).any(is_broad_target))
}

fn is_recursive_delete(segment: &CommandSegment) -> bool {
    segment.program() == "rm" && has_recursive_flag(segment)
}

fn is_raw_disk_write(segment: &CommandSegment) -> bool {
    let program = segment.program();
    if program == "mkfs" || program.starts_with("mkfs.") || program == "wipefs" || program == "mkswap" {
        return true;
    }
    let touches_device = segment.args.iter().any(|a| a.contains("/dev/") && !a.contains("/dev/null"));
    match program {
        "dd" => segment.args.iter().any(|a| a.starts_with("of=/dev/") && a != "of=/dev/null"),
        "shred" | "fdisk" | "sfdisk" | "parted" => touches_device,
        _ => false,
    }
}

fn is_world_writable_mode(mode: &str) -> bool {
    let octal = mode.trim_start_matches('0');
    octal.len() == 3 && octal.ends_with(['2', '3', '6', '7'])
        || mode.contains("o+w")
        || mode.contains("a+w")
        || mode.contains("a+rwx")
        || mode.contains("ugo+rwx")
        || mode == "+w"
}

fn is_recursive_permission_change_at_root(segment: &CommandSegment) -> bool {
    let program = segment.program();
    if !matches!(program, "chmod" | "chown" | "chgrp") || !has_recursive_flag(segment) {
        return false;
    }
    let mut positional = targets(segment);
    let Some(first) = positional.next() else {
        return false;
    };
    let at_root = positional.any(is_broad_target);
    match program {
        "chmod" => at_root && is_world_writable_mode(first),
        _ => at_root,
    }
}

fn is_elevated(segment: &CommandSegment) -> bool {
    segment.elevated
}

fn is_elevated_destructive(segment: &CommandSegment) -> bool {
    if !segment.elevated {
        return false;
    }
    let program = segment.program();
    DESTRUCTIVE_PROGRAMS.contains(&program) || program.starts_with("mkfs")
}

fn is_system_path_copy(segment: &CommandSegment) -> bool {
    let program = segment.program();
    let writes_last = matches!(program, "cp" | "mv" | "install" | "ln" | "rsync");
    let in_place_edit = program == "sed" && segment.args.iter().any(|a| a.starts_with("-i"));
    if !writes_last && !in_place_edit {
        return false;
    }
    let destination = if in_place_edit {
        targets(segment).skip(1).find(|t| is_system_write_path(t))
    } else {
        targets(segment).last().filter(|t| is_system_write_path(t))
    };
    destination.is_some()
}

fn is_system_write_path(path: &str) -> bool {
    let path = path.trim_matches(['"', '\'']);
    SYSTEM_WRITE_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

static REDIRECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d*>>?\s*([^\s;|]+)").expect("redirect pattern is valid"));

/// Whether a segment redirects output into anything but `/dev/null` or another descriptor.
pub fn writes_via_redirect(segment: &CommandSegment) -> bool {
    REDIRECT_RE.captures_iter(&segment.raw).any(|caps| {
        let target = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        !target.starts_with('&') && target != "/dev/null"
    })
}

/// `find` actions that delete, write, or run another program.
const FIND_ACTIONS: &[&str] = &["-delete", "-exec", "-execdir", "-ok", "-okdir", "-fprint", "-fls", "-fprintf"];

/// `find` tests that narrow which entries an action applies to.
const FIND_FILTERS: &[&str] = &[
    "-name", "-iname", "-path", "-ipath", "-wholename", "-iwholename", "-regex", "-iregex",
    "-newer", "-mtime", "-mmin", "-atime", "-amin", "-ctime", "-cmin", "-size", "-empty",
    "-user", "-group", "-perm", "-inum", "-links", "-samefile",
];

/// Programs that delete what `find -exec` hands them.
const FIND_DELETERS: &[&str] = &["rm", "rmdir", "unlink", "shred", "truncate", "wipefs"];

/// Starting points of a `find`: the operands before the first expression word.
fn find_start_paths(segment: &CommandSegment) -> Vec<&str> {
    let starts: Vec<&str> = segment
        .args
        .iter()
        .map(String::as_str)
        .take_while(|a| !a.starts_with('-') && !matches!(*a, "(" | ")" | "!" | "\\("))
        .collect();
    if starts.is_empty() { vec!["."] } else { starts }
}

fn find_deletes(segment: &CommandSegment) -> bool {
    segment.args.iter().enumerate().any(|(i, arg)| match arg.as_str() {
        "-delete" => true,
        "-exec" | "-execdir" | "-ok" | "-okdir" => segment
            .args
            .get(i + 1)
            .is_some_and(|program| FIND_DELETERS.contains(&executable_name(program))),
        _ => false,
    })
}

/// A deleting `find` rooted at a system path, or at a home or working directory
/// with no test narrowing the matches.
fn is_broad_find_delete(segment: &CommandSegment) -> bool {
    if segment.program() != "find" || !find_deletes(segment) {
        return false;
    }
    let filtered = segment.args.iter().any(|a| FIND_FILTERS.contains(&a.as_str()));
    find_start_paths(segment)
        .into_iter()
        .any(|start| is_broad_target(start) && (!filtered || is_system_root(start)))
}

/// Programs that execute a script read from stdin when given no script operand.
const SCRIPT_INTERPRETERS: &[&str] = &[
    "sh", "bash", "zsh", "dash", "ksh", "fish", "python", "python3", "perl", "ruby", "node",
];

/// An interpreter on the receiving end of a pipe, running whatever it is fed.
fn runs_piped_input(segment: &CommandSegment) -> bool {
    if !segment.stdin_only || !SCRIPT_INTERPRETERS.contains(&segment.program()) {
        return false;
    }
    segment.args.iter().any(|a| a == "-" || a == "-s") || targets(segment).next().is_none()
}

fn is_mutating_find(segment: &CommandSegment) -> bool {
    segment.program() == "find" && segment.args.iter().any(|a| FIND_ACTIONS.contains(&a.as_str()))
}

fn is_read_only_program(segment: &CommandSegment) -> bool {
    let program = segment.program();
    if program == "find" {
        return !is_mutating_find(segment);
    }
    READ_ONLY_PROGRAMS.contains(&program)
}

/// Normalized text for `Matcher::Text` rules: program basename plus arguments.
pub fn normalized_text(segment: &CommandSegment) -> String {
    let mut text = segment.program().to_string();
    for arg in &segment.args {
        text.push(' ');
        text.push_str(arg);
    }
    text
}

enum CompiledMatcher {
    Text(Regex),
    Raw(Regex),
    Whole(Regex),
    Predicate(SegmentPredicate),
}

/// A rule with its regex compiled.
pub struct CompiledRule {
    pub name: &'static str,
    pub risk: RiskLevel,
    pub reason: &'static str,
    matcher: CompiledMatcher,
}

impl CompiledRule {
    fn matches_segment(&self, segment: &CommandSegment, normalized: &str) -> bool {
        match &self.matcher {
            CompiledMatcher::Text(re) => re.is_match(normalized),
            CompiledMatcher::Raw(re) => re.is_match(&segment.raw),
            CompiledMatcher::Predicate(pred) => pred(segment),
            CompiledMatcher::Whole(_) => false,
        }
    }

    fn matches_whole(&self, command: &str) -> bool {
        match &self.matcher {
            CompiledMatcher::Whole(re) => re.is_match(command),
            _ => false,
        }
    }
}

/// An ordered, compiled rule table.
pub struct RuleTable {
    rules: Vec<CompiledRule>,
}

static BUILTIN: LazyLock<RuleTable> =
    LazyLock::new(|| RuleTable::compile(COMMAND_RULES).expect("built-in command rules are valid regexes"));

impl RuleTable {
    /// Compile a rule list, preserving its order.
    pub fn compile(rules: &[CommandRule]) -> Result<Self, regex::Error> {
        let compile = |pattern: &str| Regex::new(pattern);
        let rules = rules
            .iter()
            .map(|r| {
                let matcher = match r.matcher {
                    Matcher::Text(p) => CompiledMatcher::Text(compile(p)?),
                    Matcher::Raw(p) => CompiledMatcher::Raw(compile(p)?),
                    Matcher::Whole(p) => CompiledMatcher::Whole(compile(p)?),
                    Matcher::Predicate(f) => CompiledMatcher::Predicate(f),
                };
                Ok(CompiledRule {
                    name: r.name,
                    risk: r.risk,
                    reason: r.reason,
                    matcher,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { rules })
    }

    /// The table built from [`COMMAND_RULES`].
    pub fn builtin() -> &'static RuleTable {
        &BUILTIN
    }

    /// First segment-level rule that matches, in priority order.
    pub fn match_segment(&self, segment: &CommandSegment) -> Option<&CompiledRule> {
        let normalized = normalized_text(segment);
        self.rules
            .iter()
            .find(|r| r.matches_segment(segment, &normalized))
    }

    /// Every whole-command rule that matches.
    pub fn match_whole<'a>(&'a self, command: &'a str) -> impl Iterator<Item = &'a CompiledRule> + 'a {
        self.rules.iter().filter(move |r| r.matches_whole(command))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
