//! Reading and writing module manifests.
//!
//! Covers the subset of the `go.mod`, `go.work` and `go.sum` formats the
//! workspace needs: module identity, requirements, replacements, exclusions,
//! `use` directories and checksum lines. Directives that do not affect the
//! workspace layout (`toolchain`, `retract`, `godebug`) are accepted and
//! dropped.

use std::cmp::Ordering;
use std::fmt;

use camino::Utf8Path;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{name}:{line}: {message}")]
pub struct ModfileError {
    pub name: String,
    /// One-based line of the offending statement.
    pub line: usize,
    pub message: String,
}

impl ModfileError {
    fn new(name: &str, line: usize, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            line,
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Require {
    pub path: String,
    pub version: String,
    pub indirect: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Replace {
    pub old_path: String,
    pub old_version: Option<String>,
    pub new_path: String,
    /// `None` when the replacement is a directory on disk.
    pub new_version: Option<String>,
}

impl Replace {
    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.new_version.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Exclude {
    pub path: String,
    pub version: String,
}

/// A parsed `go.mod` (or `gantry.mod`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModFile {
    pub module: Option<String>,
    pub go: Option<String>,
    pub requires: Vec<Require>,
    pub replaces: Vec<Replace>,
    pub excludes: Vec<Exclude>,
}

/// A parsed `go.work`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkFile {
    pub go: Option<String>,
    pub uses: Vec<String>,
    pub replaces: Vec<Replace>,
}

/// One line of a `go.sum` file.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SumLine {
    pub module: String,
    pub version: String,
    pub hash: String,
}

impl fmt::Display for SumLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.module, self.version, self.hash)
    }
}

impl ModFile {
    pub fn parse(name: &str, text: &str) -> Result<Self, ModfileError> {
        let mut file = ModFile::default();
        for stmt in statements(name, text)? {
            let err = |message: &str| ModfileError::new(name, stmt.line, message);
            match stmt.verb.as_str() {
                "module" => {
                    if file.module.is_some() {
                        return Err(err("repeated module statement"));
                    }
                    let [path] = stmt.args.as_slice() else {
                        return Err(err("usage: module module/path"));
                    };
                    file.module = Some(path.clone());
                }
                "go" => {
                    if file.go.is_some() {
                        return Err(err("repeated go statement"));
                    }
                    file.go = Some(parse_go_directive(name, &stmt)?);
                }
                "require" => {
                    let [path, version] = stmt.args.as_slice() else {
                        return Err(err("usage: require module/path v1.2.3"));
                    };
                    check_version(name, stmt.line, version)?;
                    let indirect = stmt
                        .comment
                        .as_deref()
                        .is_some_and(|c| c == "indirect" || c.starts_with("indirect;"));
                    file.requires.push(Require {
                        path: path.clone(),
                        version: version.clone(),
                        indirect,
                    });
                }
                "replace" => file.replaces.push(parse_replace(name, &stmt)?),
                "exclude" => {
                    let [path, version] = stmt.args.as_slice() else {
                        return Err(err("usage: exclude module/path v1.2.3"));
                    };
                    check_version(name, stmt.line, version)?;
                    file.excludes.push(Exclude {
                        path: path.clone(),
                        version: version.clone(),
                    });
                }
                "toolchain" | "retract" | "godebug" => {}
                verb => return Err(err(&format!("unknown directive: {verb}"))),
            }
        }
        Ok(file)
    }

    /// Add `replace` unless its left-hand side is already replaced.
    pub fn add_replace(&mut self, replace: Replace) {
        let exists = self
            .replaces
            .iter()
            .any(|r| r.old_path == replace.old_path && r.old_version == replace.old_version);
        if !exists {
            self.replaces.push(replace);
        }
    }

    pub fn add_exclude(&mut self, exclude: Exclude) {
        if !self.excludes.contains(&exclude) {
            self.excludes.push(exclude);
        }
    }
}

impl WorkFile {
    pub fn parse(name: &str, text: &str) -> Result<Self, ModfileError> {
        let mut file = WorkFile::default();
        for stmt in statements(name, text)? {
            let err = |message: &str| ModfileError::new(name, stmt.line, message);
            match stmt.verb.as_str() {
                "go" => {
                    if file.go.is_some() {
                        return Err(err("repeated go statement"));
                    }
                    file.go = Some(parse_go_directive(name, &stmt)?);
                }
                "use" => {
                    let [dir] = stmt.args.as_slice() else {
                        return Err(err("usage: use local/dir"));
                    };
                    file.uses.push(dir.clone());
                }
                "replace" => file.replaces.push(parse_replace(name, &stmt)?),
                "toolchain" | "godebug" => {}
                verb => return Err(err(&format!("unknown directive: {verb}"))),
            }
        }
        Ok(file)
    }
}

pub fn parse_sum(name: &str, text: &str) -> Result<Vec<SumLine>, ModfileError> {
    let mut lines = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [] => {}
            [module, version, hash] => lines.push(SumLine {
                module: (*module).to_string(),
                version: (*version).to_string(),
                hash: (*hash).to_string(),
            }),
            _ => {
                return Err(ModfileError::new(
                    name,
                    index + 1,
                    format!("malformed go.sum: wrong number of fields {}", fields.len()),
                ))
            }
        }
    }
    Ok(lines)
}

/// Orders language versions like `1.9 < 1.18 < 1.18.1`. Missing components
/// count as zero and a pre-release suffix sorts before the release.
#[must_use]
pub fn compare_go_versions(a: &str, b: &str) -> Ordering {
    fn key(version: &str) -> (Vec<u64>, bool) {
        let (numeric, release) = match version.find(|c: char| c.is_ascii_alphabetic()) {
            Some(at) => (&version[..at], false),
            None => (version, true),
        };
        let mut parts: Vec<u64> = numeric
            .split('.')
            .map(|part| part.parse().unwrap_or(0))
            .collect();
        parts.resize(3, 0);
        (parts, release)
    }
    key(a).cmp(&key(b))
}

fn parse_go_directive(name: &str, stmt: &Stmt) -> Result<String, ModfileError> {
    let [version] = stmt.args.as_slice() else {
        return Err(ModfileError::new(name, stmt.line, "usage: go 1.23"));
    };
    if !valid_go_version(version) {
        return Err(ModfileError::new(
            name,
            stmt.line,
            format!("invalid go version '{version}': must match format 1.23"),
        ));
    }
    Ok(version.clone())
}

fn valid_go_version(version: &str) -> bool {
    let numeric = version
        .find(|c: char| c.is_ascii_alphabetic())
        .map_or(version, |at| &version[..at]);
    let parts: Vec<&str> = numeric.split('.').collect();
    (1..=3).contains(&parts.len())
        && parts
            .iter()
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
}

fn check_version(name: &str, line: usize, version: &str) -> Result<(), ModfileError> {
    if version.starts_with('v') && version.len() > 1 {
        Ok(())
    } else {
        Err(ModfileError::new(
            name,
            line,
            format!("invalid module version {version:?}"),
        ))
    }
}

fn parse_replace(name: &str, stmt: &Stmt) -> Result<Replace, ModfileError> {
    let usage = || {
        ModfileError::new(
            name,
            stmt.line,
            "usage: replace module/path [v1.2.3] => other/module v1.4 or => ../local/directory",
        )
    };
    let arrow = stmt
        .args
        .iter()
        .position(|arg| arg == "=>")
        .ok_or_else(usage)?;
    let (old, new) = (&stmt.args[..arrow], &stmt.args[arrow + 1..]);
    if !(1..=2).contains(&old.len()) || !(1..=2).contains(&new.len()) {
        return Err(usage());
    }

    let old_version = old.get(1).cloned();
    let new_version = new.get(1).cloned();
    for version in old_version.iter().chain(new_version.iter()) {
        check_version(name, stmt.line, version)?;
    }
    if new_version.is_none() && !is_directory_path(&new[0]) {
        return Err(ModfileError::new(
            name,
            stmt.line,
            "replacement module without version must be directory path (rooted or starting with ./ or ../)",
        ));
    }

    Ok(Replace {
        old_path: old[0].clone(),
        old_version,
        new_path: new[0].clone(),
        new_version,
    })
}

fn is_directory_path(path: &str) -> bool {
    path == "."
        || path == ".."
        || path.starts_with("./")
        || path.starts_with("../")
        || path.starts_with('/')
        || Utf8Path::new(path).is_absolute()
}

struct Stmt {
    line: usize,
    verb: String,
    args: Vec<String>,
    comment: Option<String>,
}

/// Split `text` into statements, flattening `verb ( ... )` blocks into one
/// statement per line.
fn statements(name: &str, text: &str) -> Result<Vec<Stmt>, ModfileError> {
    let mut stmts = Vec::new();
    let mut block: Option<(String, usize)> = None;

    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let (tokens, comment) = lex_line(name, line, raw)?;
        if tokens.is_empty() {
            continue;
        }

        if let Some((verb, _)) = &block {
            if tokens.len() == 1 && tokens[0] == ")" {
                block = None;
                continue;
            }
            if tokens.iter().any(|t| t == "(" || t == ")") {
                return Err(ModfileError::new(name, line, "unexpected parenthesis"));
            }
            stmts.push(Stmt {
                line,
                verb: verb.clone(),
                args: tokens,
                comment,
            });
            continue;
        }

        let mut tokens = tokens.into_iter();
        let Some(verb) = tokens.next() else {
            continue;
        };
        let args: Vec<String> = tokens.collect();
        match args.as_slice() {
            [open] if open == "(" => {
                block = Some((verb, line));
                continue;
            }
            [open, close] if open == "(" && close == ")" => continue,
            _ => {}
        }
        if verb == "(" || verb == ")" || args.iter().any(|t| t == "(" || t == ")") {
            return Err(ModfileError::new(name, line, "unexpected parenthesis"));
        }
        stmts.push(Stmt {
            line,
            verb,
            args,
            comment,
        });
    }

    if let Some((verb, line)) = block {
        return Err(ModfileError::new(
            name,
            line,
            format!("unterminated {verb} block"),
        ));
    }
    Ok(stmts)
}

fn lex_line(
    name: &str,
    line: usize,
    raw: &str,
) -> Result<(Vec<String>, Option<String>), ModfileError> {
    let mut tokens = Vec::new();
    let mut chars = raw.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if raw[start..].starts_with("//") {
            return Ok((tokens, Some(raw[start + 2..].trim().to_string())));
        }
        if c == '(' || c == ')' {
            tokens.push(c.to_string());
            chars.next();
            continue;
        }
        if c == '"' {
            chars.next();
            let mut token = String::new();
            let mut closed = false;
            while let Some((_, c)) = chars.next() {
                match c {
                    '\\' => {
                        if let Some((_, escaped)) = chars.next() {
                            token.push(escaped);
                        }
                    }
                    '"' => {
                        closed = true;
                        break;
                    }
                    c => token.push(c),
                }
            }
            if !closed {
                return Err(ModfileError::new(name, line, "unterminated quoted string"));
            }
            tokens.push(token);
            continue;
        }

        let mut end = raw.len();
        while let Some(&(at, c)) = chars.peek() {
            if c.is_whitespace() || c == '"' || c == '(' || c == ')' || raw[at..].starts_with("//")
            {
                end = at;
                break;
            }
            chars.next();
        }
        tokens.push(raw[start..end].to_string());
    }

    Ok((tokens, None))
}

fn quote(token: &str) -> String {
    let plain = !token.is_empty()
        && !token.contains("//")
        && !token
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '(' | ')'));
    if plain {
        token.to_string()
    } else {
        format!("{token:?}")
    }
}

impl fmt::Display for Replace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&quote(&self.old_path))?;
        if let Some(version) = &self.old_version {
            write!(f, " {version}")?;
        }
        write!(f, " => {}", quote(&self.new_path))?;
        if let Some(version) = &self.new_version {
            write!(f, " {version}")?;
        }
        Ok(())
    }
}

impl fmt::Display for ModFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sections: Vec<String> = Vec::new();
        if let Some(module) = &self.module {
            sections.push(format!("module {}\n", quote(module)));
        }
        if let Some(go) = &self.go {
            sections.push(format!("go {go}\n"));
        }

        let requires: Vec<String> = self
            .requires
            .iter()
            .map(|r| {
                let indirect = if r.indirect { " // indirect" } else { "" };
                format!("{} {}{indirect}", quote(&r.path), r.version)
            })
            .collect();
        let replaces: Vec<String> = self.replaces.iter().map(ToString::to_string).collect();
        let excludes: Vec<String> = self
            .excludes
            .iter()
            .map(|e| format!("{} {}", quote(&e.path), e.version))
            .collect();

        for (verb, lines) in [
            ("require", requires),
            ("replace", replaces),
            ("exclude", excludes),
        ] {
            match lines.as_slice() {
                [] => {}
                [line] => sections.push(format!("{verb} {line}\n")),
                lines => {
                    let mut section = format!("{verb} (\n");
                    for line in lines {
                        section.push('\t');
                        section.push_str(line);
                        section.push('\n');
                    }
                    section.push_str(")\n");
                    sections.push(section);
                }
            }
        }

        f.write_str(&sections.join("\n"))
    }
}
