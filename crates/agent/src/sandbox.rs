//! Access control for filesystem and command tools
//!
//! A [`SandboxPolicy`] is built once per run and never changes afterwards.
//! [`FileSandbox`] and [`CommandSandbox`] evaluate tool targets against it:
//! forbidden entries always win, then a non-empty allow-list must match.

use regex::Regex;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

use skipper_config::{expand_tilde, SandboxConfig};

/// Symlinks followed while resolving one path
const MAX_SYMLINK_HOPS: u32 = 40;

/// Nesting of `sh -c`, `eval` and substitutions inspected in one line
const MAX_COMMAND_DEPTH: usize = 8;

/// Reasons a tool target is denied
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SandboxViolation {
    #[error("path {path} is under forbidden root {root}")]
    ForbiddenPath { path: PathBuf, root: PathBuf },

    #[error("path {path} is outside the allowed roots")]
    OutsideAllowed { path: PathBuf },

    #[error("file {path} is {size} bytes, over the {limit} byte limit")]
    Oversize { path: PathBuf, size: u64, limit: u64 },

    #[error("cannot resolve path {path}: {reason}")]
    Unresolvable { path: String, reason: String },

    #[error("command '{command}' is forbidden")]
    ForbiddenCommand { command: String },

    #[error("command '{command}' is not in the allowed command list")]
    CommandNotAllowed { command: String },

    #[error("empty command")]
    EmptyCommand,

    #[error("cannot parse command line: {0}")]
    MalformedCommand(String),

    #[error("command word '{word}' is only known after shell expansion")]
    DynamicCommand { word: String },
}

/// What a file tool intends to do with a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperation {
    Read,
    Write,
    Edit,
    List,
}

impl FileOperation {
    fn checks_size(self) -> bool {
        matches!(self, FileOperation::Read | FileOperation::Edit)
    }
}

/// Immutable access rules for one run
#[derive(Debug, Clone)]
pub struct SandboxPolicy {
    workspace: PathBuf,
    allowed_paths: Vec<PathBuf>,
    forbidden_paths: Vec<PathBuf>,
    max_file_bytes: u64,
    allowed_commands: HashSet<String>,
    forbidden_commands: HashSet<String>,
}

impl SandboxPolicy {
    /// Build a policy. Roots are resolved to canonical form here, relative
    /// ones against `workspace`.
    pub fn new(
        workspace: impl AsRef<Path>,
        allowed_paths: &[String],
        forbidden_paths: &[String],
        max_file_bytes: u64,
        allowed_commands: &[String],
        forbidden_commands: &[String],
    ) -> Self {
        let workspace = absolute_workspace(workspace.as_ref());
        let resolve_roots = |roots: &[String]| -> Vec<PathBuf> {
            roots
                .iter()
                .filter(|r| !r.trim().is_empty())
                .map(|r| resolve_path(r, &workspace).unwrap_or_else(|_| workspace.join(r)))
                .collect()
        };

        Self {
            allowed_paths: resolve_roots(allowed_paths),
            forbidden_paths: resolve_roots(forbidden_paths),
            max_file_bytes,
            allowed_commands: command_set(allowed_commands),
            forbidden_commands: command_set(forbidden_commands),
            workspace,
        }
    }

    /// Policy from the `sandbox` config section. The workspace is always an
    /// allowed root.
    pub fn from_config(config: &SandboxConfig, workspace: impl AsRef<Path>) -> Self {
        let workspace = workspace.as_ref();
        let mut allowed = config.allowed_paths.clone();
        allowed.push(workspace.to_string_lossy().into_owned());
        Self::new(
            workspace,
            &allowed,
            &config.forbidden_paths,
            config.max_file_bytes,
            &config.allowed_commands,
            &config.forbidden_commands,
        )
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn allowed_paths(&self) -> &[PathBuf] {
        &self.allowed_paths
    }

    pub fn forbidden_paths(&self) -> &[PathBuf] {
        &self.forbidden_paths
    }

    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_bytes
    }

    pub fn allowed_commands(&self) -> &HashSet<String> {
        &self.allowed_commands
    }

    pub fn forbidden_commands(&self) -> &HashSet<String> {
        &self.forbidden_commands
    }
}

fn command_set(names: &[String]) -> HashSet<String> {
    names
        .iter()
        .map(|n| executable_name(n.trim()))
        .filter(|n| !n.is_empty())
        .collect()
}

fn absolute_workspace(workspace: &Path) -> PathBuf {
    let absolute = if workspace.is_absolute() {
        workspace.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(workspace))
            .unwrap_or_else(|_| workspace.to_path_buf())
    };
    let mut hops = MAX_SYMLINK_HOPS;
    normalize(&absolute, &mut hops).unwrap_or(absolute)
}

/// Resolve `raw` to an absolute path with `.`/`..` segments and symlinks
/// resolved. Relative paths are taken from `base`; components that do not
/// exist yet are kept as written.
pub fn resolve_path(raw: &str, base: &Path) -> std::io::Result<PathBuf> {
    let expanded = expand_tilde(raw.trim());
    let joined = if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    };
    let mut hops = MAX_SYMLINK_HOPS;
    normalize(&joined, &mut hops)
}

fn normalize(path: &Path, hops: &mut u32) -> std::io::Result<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(name) => {
                out.push(name);
                let is_link = std::fs::symlink_metadata(&out)
                    .map(|m| m.file_type().is_symlink())
                    .unwrap_or(false);
                if is_link {
                    if *hops == 0 {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::Other,
                            "too many levels of symbolic links",
                        ));
                    }
                    *hops -= 1;
                    let target = std::fs::read_link(&out)?;
                    out.pop();
                    let next = if target.is_absolute() {
                        target
                    } else {
                        out.join(target)
                    };
                    out = normalize(&next, hops)?;
                }
            }
        }
    }
    Ok(out)
}

/// Path checks for file tools
#[derive(Debug, Clone)]
pub struct FileSandbox {
    policy: Arc<SandboxPolicy>,
}

impl FileSandbox {
    pub fn new(policy: Arc<SandboxPolicy>) -> Self {
        Self { policy }
    }

    /// Canonicalize `path` and check it. Returns the canonical path to use
    /// for the actual I/O.
    pub fn validate_path(
        &self,
        path: &str,
        operation: FileOperation,
    ) -> Result<PathBuf, SandboxViolation> {
        if path.trim().is_empty() {
            return Err(SandboxViolation::Unresolvable {
                path: path.to_string(),
                reason: "empty path".to_string(),
            });
        }

        let canonical = resolve_path(path, &self.policy.workspace).map_err(|e| {
            SandboxViolation::Unresolvable {
                path: path.to_string(),
                reason: e.to_string(),
            }
        })?;

        if let Some(root) = self
            .policy
            .forbidden_paths
            .iter()
            .find(|root| canonical.starts_with(root))
        {
            return Err(SandboxViolation::ForbiddenPath {
                path: canonical,
                root: root.clone(),
            });
        }

        if !self.policy.allowed_paths.is_empty()
            && !self
                .policy
                .allowed_paths
                .iter()
                .any(|root| canonical.starts_with(root))
        {
            return Err(SandboxViolation::OutsideAllowed { path: canonical });
        }

        if operation.checks_size() {
            if let Ok(meta) = std::fs::metadata(&canonical) {
                if meta.is_file() && meta.len() > self.policy.max_file_bytes {
                    return Err(SandboxViolation::Oversize {
                        path: canonical,
                        size: meta.len(),
                        limit: self.policy.max_file_bytes,
                    });
                }
            }
        }

        Ok(canonical)
    }
}

/// Executable checks for the command tool
#[derive(Debug, Clone)]
pub struct CommandSandbox {
    policy: Arc<SandboxPolicy>,
}

impl CommandSandbox {
    pub fn new(policy: Arc<SandboxPolicy>) -> Self {
        Self { policy }
    }

    /// Check every executable reachable from `command_line`. Returns the
    /// names found, in order of appearance.
    pub fn validate_command(&self, command_line: &str) -> Result<Vec<String>, SandboxViolation> {
        let executables = extract_executables(command_line)?;
        if executables.is_empty() {
            return Err(SandboxViolation::EmptyCommand);
        }

        if let Some(name) = executables
            .iter()
            .find(|name| self.policy.forbidden_commands.contains(*name))
        {
            return Err(SandboxViolation::ForbiddenCommand {
                command: name.clone(),
            });
        }

        if !self.policy.allowed_commands.is_empty() {
            if let Some(name) = executables
                .iter()
                .find(|name| !self.policy.allowed_commands.contains(*name))
            {
                return Err(SandboxViolation::CommandNotAllowed {
                    command: name.clone(),
                });
            }
        }

        Ok(executables)
    }
}

/// Both checkers over one shared policy
#[derive(Debug, Clone)]
pub struct Sandbox {
    pub files: FileSandbox,
    pub commands: CommandSandbox,
}

impl Sandbox {
    pub fn new(policy: SandboxPolicy) -> Self {
        let policy = Arc::new(policy);
        Self {
            files: FileSandbox::new(policy.clone()),
            commands: CommandSandbox::new(policy),
        }
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.files.policy
    }
}

/// `/usr/bin/rm` -> `rm`
pub fn executable_name(word: &str) -> String {
    word.rsplit('/').next().unwrap_or(word).to_string()
}

fn assignment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\[[^\]]*\])?\+?=").expect("assignment regex is valid")
    })
}

fn duration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[+-]?\d+(\.\d+)?[smhd]?$").expect("duration regex is valid"))
}

const RESERVED_WORDS: &[&str] = &[
    "if", "then", "else", "elif", "fi", "do", "done", "while", "until", "!", "{", "}", "[[",
    "]]", "function", "coproc",
];

/// Words that run the rest of their arguments as a command
const WRAPPERS: &[&str] = &[
    "env", "nohup", "time", "nice", "ionice", "exec", "command", "builtin", "xargs", "sudo",
    "doas", "timeout", "stdbuf", "setsid", "chroot", "strace", "watch", "unbuffer",
];

const SHELLS: &[&str] = &["sh", "bash", "zsh", "dash", "ksh", "fish"];

/// Characters that make a command word depend on expansion
const EXPANSION_CHARS: &[char] = &['$', '`', '{', '}', '*', '?', '['];

fn is_dynamic(word: &str) -> bool {
    word != "[" && word.chars().any(|c| EXPANSION_CHARS.contains(&c))
}

/// Every executable name a shell line would run, including those inside
/// command substitutions, `sh -c` strings, `eval` and wrapper commands.
/// A command word that only resolves after expansion (`$X`, `{rm,x}`,
/// `*`) is rejected since its name cannot be checked.
pub fn extract_executables(line: &str) -> Result<Vec<String>, SandboxViolation> {
    let mut out = Vec::new();
    collect_line(line, 0, &mut out)?;
    Ok(out)
}

fn collect_line(
    line: &str,
    depth: usize,
    out: &mut Vec<String>,
) -> Result<(), SandboxViolation> {
    if depth > MAX_COMMAND_DEPTH {
        return Err(SandboxViolation::MalformedCommand(
            "command nesting too deep".to_string(),
        ));
    }

    let mut nested = Vec::new();
    let segments =
        split_segments(line, &mut nested).map_err(SandboxViolation::MalformedCommand)?;
    for words in &segments {
        collect_words(words, depth, out)?;
    }
    for inner in &nested {
        collect_line(inner, depth + 1, out)?;
    }
    Ok(())
}

fn collect_words(
    words: &[String],
    depth: usize,
    out: &mut Vec<String>,
) -> Result<(), SandboxViolation> {
    let mut idx = 0;
    while let Some(word) = words.get(idx) {
        if assignment_re().is_match(word) || RESERVED_WORDS.contains(&word.as_str()) {
            idx += 1;
            continue;
        }
        // loop and case headers name variables and patterns, not commands
        if matches!(word.as_str(), "for" | "case" | "select" | "in" | "esac") {
            return Ok(());
        }
        break;
    }
    let Some(first) = words.get(idx) else {
        return Ok(());
    };
    if is_dynamic(first) {
        return Err(SandboxViolation::DynamicCommand {
            word: first.clone(),
        });
    }

    let name = executable_name(first);
    if name.is_empty() {
        return Ok(());
    }
    out.push(name.clone());
    let rest = &words[idx + 1..];

    if WRAPPERS.contains(&name.as_str()) {
        let skip = rest
            .iter()
            .take_while(|w| {
                w.starts_with('-') || duration_re().is_match(w) || assignment_re().is_match(w)
            })
            .count();
        return collect_words(&rest[skip..], depth, out);
    }

    if SHELLS.contains(&name.as_str()) {
        if let Some(pos) = rest
            .iter()
            .position(|w| w.starts_with('-') && !w.starts_with("--") && w.contains('c'))
        {
            if let Some(script) = rest.get(pos + 1) {
                return collect_line(script, depth + 1, out);
            }
        }
        return Ok(());
    }

    if name == "eval" {
        return collect_line(&rest.join(" "), depth + 1, out);
    }

    if name == "find" {
        for (i, w) in rest.iter().enumerate() {
            if matches!(w.as_str(), "-exec" | "-execdir" | "-ok" | "-okdir") {
                let end = rest[i + 1..]
                    .iter()
                    .position(|w| w == ";" || w == "+")
                    .map(|p| i + 1 + p)
                    .unwrap_or(rest.len());
                collect_words(&rest[i + 1..end], depth, out)?;
            }
        }
    }

    Ok(())
}

/// Split a line into simple commands (word lists). Text of `$(..)`,
/// backticks and `<(..)`/`>(..)` is pushed to `nested` for separate
/// inspection.
fn split_segments(line: &str, nested: &mut Vec<String>) -> Result<Vec<Vec<String>>, String> {
    let chars: Vec<char> = line.chars().collect();
    let mut lexer = Lexer::default();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            ' ' | '\t' | '\r' => {
                lexer.end_word();
                i += 1;
            }
            '\n' | ';' | '|' | '(' | ')' => {
                lexer.end_segment();
                i += 1;
            }
            '&' if next == Some('>') => {
                lexer.end_word();
                i += 2;
                if chars.get(i) == Some(&'>') {
                    i += 1;
                }
                lexer.redirect_target = true;
            }
            '&' => {
                lexer.end_segment();
                i += 1;
            }
            '<' | '>' if next == Some('(') => {
                let (inner, end) = take_balanced(&chars, i + 2)?;
                nested.push(inner);
                lexer.word.push_str("<()");
                lexer.in_word = true;
                i = end;
            }
            '<' | '>' => {
                if lexer.in_word && lexer.word.chars().all(|ch| ch.is_ascii_digit()) {
                    lexer.word.clear();
                    lexer.in_word = false;
                } else {
                    lexer.end_word();
                }
                i += 1;
                while matches!(chars.get(i), Some('<' | '>' | '&' | '|')) {
                    i += 1;
                }
                lexer.redirect_target = true;
            }
            '\'' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == '\'')
                    .ok_or_else(|| "unterminated single quote".to_string())?;
                lexer.word.extend(chars[i + 1..i + 1 + close].iter());
                lexer.in_word = true;
                i += close + 2;
            }
            '"' => {
                i = lex_double_quoted(&chars, i + 1, &mut lexer, nested)?;
            }
            '\\' => {
                if let Some(escaped) = next {
                    if escaped != '\n' {
                        lexer.word.push(escaped);
                        lexer.in_word = true;
                    }
                    i += 2;
                } else {
                    i += 1;
                }
            }
            '`' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == '`')
                    .ok_or_else(|| "unterminated backtick".to_string())?;
                nested.push(chars[i + 1..i + 1 + close].iter().collect());
                lexer.word.push_str("$()");
                lexer.in_word = true;
                i += close + 2;
            }
            '$' if next == Some('(') => {
                let arithmetic = chars.get(i + 2) == Some(&'(');
                let (inner, end) = take_balanced(&chars, i + 2)?;
                if !arithmetic {
                    nested.push(inner);
                }
                lexer.word.push_str("$()");
                lexer.in_word = true;
                i = end;
            }
            '#' if !lexer.in_word => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            _ => {
                lexer.word.push(c);
                lexer.in_word = true;
                i += 1;
            }
        }
    }

    lexer.end_segment();
    Ok(lexer.segments)
}

/// Consume a double-quoted string starting after the opening quote;
/// returns the index after the closing quote.
fn lex_double_quoted(
    chars: &[char],
    mut i: usize,
    lexer: &mut Lexer,
    nested: &mut Vec<String>,
) -> Result<usize, String> {
    lexer.in_word = true;
    while i < chars.len() {
        match chars[i] {
            '"' => return Ok(i + 1),
            '\\' if i + 1 < chars.len() => {
                lexer.word.push(chars[i + 1]);
                i += 2;
            }
            '$' if chars.get(i + 1) == Some(&'(') => {
                let arithmetic = chars.get(i + 2) == Some(&'(');
                let (inner, end) = take_balanced(chars, i + 2)?;
                if !arithmetic {
                    nested.push(inner);
                }
                lexer.word.push_str("$()");
                i = end;
            }
            '`' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == '`')
                    .ok_or_else(|| "unterminated backtick".to_string())?;
                nested.push(chars[i + 1..i + 1 + close].iter().collect());
                lexer.word.push_str("$()");
                i += close + 2;
            }
            c => {
                lexer.word.push(c);
                i += 1;
            }
        }
    }
    Err("unterminated double quote".to_string())
}

/// Text up to the `)` matching an already-consumed `(`; returns it with
/// the index after that `)`.
fn take_balanced(chars: &[char], start: usize) -> Result<(String, usize), String> {
    let mut depth = 1;
    let mut i = start;
    let mut quote: Option<char> = None;
    while i < chars.len() {
        let c = chars[i];
        match quote {
            Some(q) => {
                if c == '\\' && q == '"' {
                    i += 1;
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => quote = Some(c),
                '\\' => i += 1,
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok((chars[start..i].iter().collect(), i + 1));
                    }
                }
                _ => {}
            },
        }
        i += 1;
    }
    Err("unbalanced parentheses".to_string())
}

#[derive(Default)]
struct Lexer {
    segments: Vec<Vec<String>>,
    words: Vec<String>,
    word: String,
    in_word: bool,
    redirect_target: bool,
}

impl Lexer {
    fn end_word(&mut self) {
        if !self.in_word {
            return;
        }
        let word = std::mem::take(&mut self.word);
        self.in_word = false;
        if self.redirect_target {
            self.redirect_target = false;
        } else {
            self.words.push(word);
        }
    }

    fn end_segment(&mut self) {
        self.end_word();
        self.redirect_target = false;
        if !self.words.is_empty() {
            self.segments.push(std::mem::take(&mut self.words));
        }
    }
}
