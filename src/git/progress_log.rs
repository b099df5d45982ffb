/// One significant line of a captured fast-import log:
/// `progress SVN r<revnum> branch <branch> = :<mark>`.
pub(super) struct ProgressEntry {
    pub(super) revnum: u32,
    pub(super) branch: String,
    pub(super) mark: u32,
}

/// Parses one log line. A `#` introduces an end-of-line comment and
/// surrounding whitespace is ignored; any line that is not a progress
/// record yields `None`.
///
/// The branch capture is greedy: it extends to the last ` = :<digits>`
/// suffix of the line, so a branch name that itself contains ` = :` is
/// misparsed the same way the consuming regex misparses it.
pub(super) fn parse_line(line: &[u8]) -> Option<ProgressEntry> {
    let mut line = line;
    if let Some(hash) = line.iter().position(|&b| b == b'#') {
        line = &line[..hash];
    }
    let line = line.trim_ascii();

    let rest = line.strip_prefix(b"progress SVN r")?;

    let digits = rest
        .iter()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(rest.len());
    if digits == 0 {
        return None;
    }
    let revnum = std::str::from_utf8(&rest[..digits]).ok()?.parse().ok()?;

    let rest = rest[digits..].strip_prefix(b" branch ")?;

    let mut end = rest.len();
    loop {
        let split = rest[..end].windows(4).rposition(|w| w == b" = :")?;
        let mark_part = &rest[split + 4..];
        if !mark_part.is_empty() && mark_part.iter().all(u8::is_ascii_digit) {
            let branch = &rest[..split];
            if branch.is_empty() || branch[0].is_ascii_whitespace() {
                return None;
            }
            let mark = std::str::from_utf8(mark_part).ok()?.parse().ok()?;
            return Some(ProgressEntry {
                revnum,
                branch: String::from_utf8(branch.to_vec()).ok()?,
                mark,
            });
        }
        end = split;
    }
}
