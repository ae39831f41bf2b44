//! Path shape analysis for lookups
//!
//! The walker only deals with one shape: a drive root followed by dot-free
//! components. Everything here is about recognizing that shape cheaply and
//! splitting it up without allocating.

/// Default limit on path length, in UTF-16 code units (the Win32 long path limit)
pub const DEFAULT_MAX_PATH_LEN: usize = 32_767;

/// Is this byte a path separator?
#[inline]
pub fn is_separator(b: u8) -> bool {
    b == b'\\' || b == b'/'
}

/// Recognized root of a lookup path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRoot<'a> {
    /// `X:\...`; `rest` is everything after the first separator
    Drive { letter: char, rest: &'a str },
    /// `\\server\share\...`
    Unc,
    /// Relative, drive-relative (`C:foo`) or rooted without a drive (`\foo`)
    Relative,
}

/// Classify the root of a path
pub fn classify(path: &str) -> PathRoot<'_> {
    let bytes = path.as_bytes();

    if bytes.len() >= 2 && is_separator(bytes[0]) && is_separator(bytes[1]) {
        return PathRoot::Unc;
    }

    if bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && is_separator(bytes[2])
    {
        return PathRoot::Drive {
            letter: bytes[0].to_ascii_uppercase() as char,
            rest: &path[3..],
        };
    }

    PathRoot::Relative
}

/// Does the path contain a `.` or `..` component?
pub fn has_dot_components(path: &str) -> bool {
    path.split(['\\', '/'])
        .any(|comp| comp == "." || comp == "..")
}

/// Can the absolute walker handle this path as-is?
pub fn is_walkable(path: &str) -> bool {
    matches!(classify(path), PathRoot::Drive { .. }) && !has_dot_components(path)
}

/// Make `path` absolute against the drive-rooted `cwd` and resolve its
/// `.` and `..` components without touching the file system.
///
/// Returns `None` for UNC paths or when `cwd` is not drive rooted.
pub fn lexical_absolute(path: &str, cwd: &str) -> Option<String> {
    let (letter, rest) = match classify(path) {
        PathRoot::Drive { letter, rest } => (letter, rest.to_string()),
        PathRoot::Unc => return None,
        PathRoot::Relative => {
            let PathRoot::Drive {
                letter: cwd_letter,
                rest: cwd_rest,
            } = classify(cwd)
            else {
                return None;
            };

            let bytes = path.as_bytes();
            if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
                // Drive relative; only the current drive has a known directory
                let letter = bytes[0].to_ascii_uppercase() as char;
                let tail = &path[2..];
                if letter == cwd_letter {
                    (letter, format!("{}\\{}", cwd_rest, tail))
                } else {
                    (letter, tail.to_string())
                }
            } else if bytes.first().copied().is_some_and(is_separator) {
                (cwd_letter, path.to_string())
            } else {
                (cwd_letter, format!("{}\\{}", cwd_rest, path))
            }
        }
    };

    let mut parts: Vec<&str> = Vec::new();
    for comp in components(&rest) {
        match comp.name {
            "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name),
        }
    }

    let mut out = format!("{}:\\", letter);
    out.push_str(&parts.join("\\"));
    if !parts.is_empty() && path.bytes().last().is_some_and(is_separator) {
        out.push('\\');
    }
    Some(out)
}

/// One path component with the separators that follow it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Component<'a> {
    pub name: &'a str,
    pub trailing_separators: usize,
    pub is_last: bool,
}

/// Iterator over maximal runs of non-separator characters
pub struct Components<'a> {
    rest: &'a str,
}

/// Split a path (or the part after its root) into components
pub fn components(path: &str) -> Components<'_> {
    let start = path
        .bytes()
        .position(|b| !is_separator(b))
        .unwrap_or(path.len());
    Components {
        rest: &path[start..],
    }
}

impl<'a> Iterator for Components<'a> {
    type Item = Component<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }

        let bytes = self.rest.as_bytes();
        let end = bytes
            .iter()
            .position(|&b| is_separator(b))
            .unwrap_or(bytes.len());
        let seps = bytes[end..]
            .iter()
            .take_while(|&&b| is_separator(b))
            .count();

        let name = &self.rest[..end];
        self.rest = &self.rest[end + seps..];

        Some(Component {
            name,
            trailing_separators: seps,
            is_last: self.rest.is_empty(),
        })
    }
}
