//! Lazy, single-pass cursors over directory entries.

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::{DirFilters, EngineRegistry, EntryInfo, FileFlags, RegistryRef};

/// Shared bookkeeping for [`EngineIterator`] implementations.
///
/// Holds the listed directory (always ending in `/`), the entry filters, the
/// compiled name filters, and the memoized info of the current entry.
///
/// Entry info that was not [`prime`](Self::prime)d is looked up through the
/// registry given to [`with_registry`](Self::with_registry), or the global
/// one.
#[derive(Debug)]
pub struct IteratorState {
    path: String,
    filters: DirFilters,
    name_filters: Vec<String>,
    patterns: Vec<Regex>,
    registry: Option<RegistryRef>,
    info: RefCell<Option<EntryInfo>>,
    info_loads: Cell<usize>,
}

impl IteratorState {
    /// Create state for listing `path`.
    pub fn new(path: impl AsRef<Path>, filters: DirFilters, name_filters: &[String]) -> Self {
        let case_sensitive = filters.contains(DirFilters::CASE_SENSITIVE);
        let patterns = name_filters
            .iter()
            .filter_map(|pattern| wildcard_to_regex(pattern, case_sensitive))
            .collect();
        Self {
            path: append_slash_if_needed(&path.as_ref().to_string_lossy()),
            filters,
            name_filters: name_filters.to_vec(),
            patterns,
            registry: None,
            info: RefCell::new(None),
            info_loads: Cell::new(0),
        }
    }

    /// Resolve entry info through `registry` instead of the global one.
    pub fn with_registry(mut self, registry: &EngineRegistry) -> Self {
        self.registry = Some(registry.downgrade());
        self
    }

    /// The listed directory, ending in `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The entry filters.
    pub fn filters(&self) -> DirFilters {
        self.filters
    }

    /// The name filters as given.
    pub fn name_filters(&self) -> &[String] {
        &self.name_filters
    }

    /// Full path of the entry called `name`.
    pub fn join(&self, name: &str) -> PathBuf {
        PathBuf::from(format!("{}{}", self.path, name))
    }

    /// Returns `true` if `name` matches the name filters.
    ///
    /// An empty filter list matches everything.
    pub fn matches_name(&self, name: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|re| re.is_match(name))
    }

    /// Returns `true` if the entry passes both the entry and the name filters.
    ///
    /// `DRIVES`, `SYSTEM` and `MODIFIED` are passed through uninterpreted.
    pub fn accepts(&self, info: &EntryInfo) -> bool {
        let f = self.filters;
        let name = info.name.as_str();
        if (name == "." && f.contains(DirFilters::NO_DOT))
            || (name == ".." && f.contains(DirFilters::NO_DOT_DOT))
        {
            return false;
        }

        let is_dir = info.is_dir();
        if f.contains(DirFilters::NO_SYMLINKS) && info.flags.contains(FileFlags::LINK_TYPE) {
            return false;
        }
        if !f.contains(DirFilters::HIDDEN)
            && info.flags.contains(FileFlags::HIDDEN)
            && name != "."
            && name != ".."
        {
            return false;
        }

        let skip_name_filters = is_dir && f.contains(DirFilters::ALL_DIRS);
        if !skip_name_filters && !self.matches_name(name) {
            return false;
        }

        if f.intersects(DirFilters::DIRS | DirFilters::FILES) {
            if is_dir && !f.intersects(DirFilters::DIRS | DirFilters::ALL_DIRS) {
                return false;
            }
            if !is_dir && !f.contains(DirFilters::FILES) {
                return false;
            }
        }

        let wanted = [
            (DirFilters::READABLE, FileFlags::READ_USER),
            (DirFilters::WRITABLE, FileFlags::WRITE_USER),
            (DirFilters::EXECUTABLE, FileFlags::EXE_USER),
        ];
        wanted
            .iter()
            .all(|(filter, flag)| !f.contains(*filter) || info.flags.contains(*flag))
    }

    /// Seed the memo with info the iterator already computed while filtering.
    pub fn prime(&self, info: EntryInfo) {
        *self.info.borrow_mut() = Some(info);
    }

    /// Info for `path`, recomputed only when `path` differs from the cached one.
    fn entry_info(&self, path: &Path, name: &str) -> EntryInfo {
        if let Some(cached) = self.info.borrow().as_ref() {
            if cached.path == path {
                return cached.clone();
            }
        }
        self.info_loads.set(self.info_loads.get() + 1);
        let mut info = match &self.registry {
            Some(registry) => registry.entry_info(path),
            None => EngineRegistry::global().entry_info(path),
        };
        info.name = name.to_string();
        *self.info.borrow_mut() = Some(info.clone());
        info
    }

    #[cfg(test)]
    pub(crate) fn info_loads(&self) -> usize {
        self.info_loads.get()
    }
}

/// A lazy, unidirectional cursor over the entries of one directory.
///
/// Engines hand these out from
/// [`FileEngine::begin_entry_list`](crate::FileEngine::begin_entry_list).
/// Once [`advance`](Self::advance) has returned `false` it keeps returning
/// `false`: a cursor never restarts.
///
/// # Invariant
///
/// `current_file_path() == path() + current_file_name()`.
pub trait EngineIterator: Send {
    /// The iterator's bookkeeping.
    fn state(&self) -> &IteratorState;

    /// Move to the next accepted entry; `false` once exhausted.
    fn advance(&mut self) -> bool;

    /// Name of the current entry, `None` before the first advance and after
    /// exhaustion.
    fn current_file_name(&self) -> Option<String>;

    /// The listed directory, ending in `/`.
    fn path(&self) -> &str {
        self.state().path()
    }

    /// The entry filters.
    fn filters(&self) -> DirFilters {
        self.state().filters()
    }

    /// The name filters.
    fn name_filters(&self) -> &[String] {
        self.state().name_filters()
    }

    /// Full path of the current entry.
    fn current_file_path(&self) -> Option<PathBuf> {
        self.current_file_name().map(|name| self.state().join(&name))
    }

    /// Info for the current entry, memoized until the cursor moves.
    fn current_entry_info(&self) -> Option<EntryInfo> {
        let name = self.current_file_name()?;
        let path = self.state().join(&name);
        Some(self.state().entry_info(&path, &name))
    }
}

fn append_slash_if_needed(path: &str) -> String {
    if !path.is_empty()
        && !path.ends_with('/')
        && !path.ends_with(std::path::MAIN_SEPARATOR)
    {
        format!("{path}/")
    } else {
        path.to_string()
    }
}

/// Compile a shell wildcard (`*`, `?`, `[...]`) into an anchored regex,
/// falling back to a literal match when the translation does not compile.
fn wildcard_to_regex(pattern: &str, case_sensitive: bool) -> Option<Regex> {
    let mut out = String::with_capacity(pattern.len() + 8);
    if !case_sensitive {
        out.push_str("(?i)");
    }
    out.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                let mut class = String::new();
                let mut closed = false;
                if chars.peek() == Some(&'!') {
                    chars.next();
                    class.push('^');
                }
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    if c == '\\' || c == '[' {
                        class.push('\\');
                    }
                    class.push(c);
                }
                if closed {
                    out.push('[');
                    out.push_str(&class);
                    out.push(']');
                } else {
                    out.push_str(&regex::escape(&format!("[{class}")));
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out)
        .or_else(|_| Regex::new(&format!("^{}$", regex::escape(pattern))))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, flags: FileFlags) -> EntryInfo {
        EntryInfo {
            name: name.to_string(),
            path: PathBuf::from(format!("/d/{name}")),
            flags: flags | FileFlags::EXISTS,
            size: 0,
        }
    }

    /// Iterator over a fixed list of names.
    struct ListIter {
        state: IteratorState,
        names: std::iter::Fuse<std::vec::IntoIter<String>>,
        current: Option<String>,
    }

    impl ListIter {
        fn new(names: &[&str]) -> Self {
            Self::over(IteratorState::new("/list", DirFilters::default(), &[]), names)
        }

        fn over(state: IteratorState, names: &[&str]) -> Self {
            Self {
                state,
                names: names
                    .iter()
                    .map(|n| n.to_string())
                    .collect::<Vec<_>>()
                    .into_iter()
                    .fuse(),
                current: None,
            }
        }
    }

    impl EngineIterator for ListIter {
        fn state(&self) -> &IteratorState {
            &self.state
        }

        fn advance(&mut self) -> bool {
            self.current = self.names.next();
            self.current.is_some()
        }

        fn current_file_name(&self) -> Option<String> {
            self.current.clone()
        }
    }

    #[test]
    fn path_gets_trailing_slash() {
        let state = IteratorState::new("/tmp/dir", DirFilters::default(), &[]);
        assert_eq!(state.path(), "/tmp/dir/");
        let state = IteratorState::new("/tmp/dir/", DirFilters::default(), &[]);
        assert_eq!(state.path(), "/tmp/dir/");
        let state = IteratorState::new("", DirFilters::default(), &[]);
        assert_eq!(state.path(), "");
    }

    #[test]
    fn current_path_is_path_plus_name() {
        let mut it = ListIter::new(&["a.txt"]);
        assert!(it.current_file_path().is_none());
        assert!(it.advance());
        assert_eq!(it.current_file_path(), Some(PathBuf::from("/list/a.txt")));
    }

    #[test]
    fn exhausted_iterator_stays_exhausted() {
        let mut it = ListIter::new(&["a", "b", "c"]);
        let mut seen = 0;
        while it.advance() {
            seen += 1;
        }
        assert_eq!(seen, 3);
        for _ in 0..5 {
            assert!(!it.advance());
            assert!(it.current_file_name().is_none());
        }
    }

    #[test]
    fn entry_info_is_memoized_per_path() {
        let mut it = ListIter::new(&["a", "b"]);
        it.advance();
        let first = it.current_entry_info().unwrap();
        let again = it.current_entry_info().unwrap();
        assert_eq!(first, again);
        assert_eq!(it.state().info_loads(), 1);

        it.advance();
        let second = it.current_entry_info().unwrap();
        assert_eq!(second.name, "b");
        assert_eq!(it.state().info_loads(), 2);
    }

    #[test]
    fn entry_info_resolves_through_the_given_registry() {
        let registry = EngineRegistry::new();
        let store = crate::MemoryHandler::new("scoped:/");
        store.insert("scoped:/d/a", b"abc".to_vec());
        let _registration = registry.register(store);

        let state = IteratorState::new("scoped:/d", DirFilters::default(), &[])
            .with_registry(&registry);
        let mut it = ListIter::over(state, &["a"]);
        it.advance();
        let info = it.current_entry_info().unwrap();
        assert!(info.is_file());
        assert_eq!(info.size, 3);
        assert_eq!(info.name, "a");

        let unscoped = IteratorState::new("scoped:/d", DirFilters::default(), &[]);
        let mut it = ListIter::over(unscoped, &["a"]);
        it.advance();
        assert!(!it.current_entry_info().unwrap().exists());
    }

    #[test]
    fn entry_info_survives_a_dropped_registry() {
        let registry = EngineRegistry::new();
        let state = IteratorState::new("/nonexistent-dir", DirFilters::default(), &[])
            .with_registry(&registry);
        drop(registry);
        let mut it = ListIter::over(state, &["x"]);
        it.advance();
        assert!(!it.current_entry_info().unwrap().exists());
    }

    #[test]
    fn primed_info_is_not_reloaded() {
        let mut it = ListIter::new(&["a"]);
        it.advance();
        it.state().prime(EntryInfo {
            name: "a".into(),
            path: PathBuf::from("/list/a"),
            flags: FileFlags::EXISTS | FileFlags::FILE_TYPE,
            size: 3,
        });
        let got = it.current_entry_info().unwrap();
        assert!(got.is_file());
        assert_eq!(it.state().info_loads(), 0);
    }

    #[test]
    fn wildcards_match_like_a_shell() {
        let state = IteratorState::new("/", DirFilters::default(), &["*.rs".into(), "a?c".into()]);
        assert!(state.matches_name("main.rs"));
        assert!(state.matches_name("MAIN.RS"));
        assert!(state.matches_name("abc"));
        assert!(!state.matches_name("abbc"));
        assert!(!state.matches_name("main.rsx"));
    }

    #[test]
    fn case_sensitive_filters() {
        let filters = DirFilters::default() | DirFilters::CASE_SENSITIVE;
        let state = IteratorState::new("/", filters, &["*.rs".into()]);
        assert!(state.matches_name("lib.rs"));
        assert!(!state.matches_name("LIB.RS"));
    }

    #[test]
    fn bracket_classes() {
        let state = IteratorState::new("/", DirFilters::default(), &["file[0-9]".into(), "x[!a]".into()]);
        assert!(state.matches_name("file7"));
        assert!(!state.matches_name("filex"));
        assert!(state.matches_name("xb"));
        assert!(!state.matches_name("xa"));
    }

    #[test]
    fn unclosed_bracket_is_literal() {
        let state = IteratorState::new("/", DirFilters::default(), &["a[b".into()]);
        assert!(state.matches_name("a[b"));
        assert!(!state.matches_name("ab"));
    }

    #[test]
    fn type_filters() {
        let files_only = IteratorState::new("/", DirFilters::FILES, &[]);
        assert!(files_only.accepts(&info("f", FileFlags::FILE_TYPE)));
        assert!(!files_only.accepts(&info("d", FileFlags::DIRECTORY_TYPE)));

        let dirs_only = IteratorState::new("/", DirFilters::DIRS, &[]);
        assert!(dirs_only.accepts(&info("d", FileFlags::DIRECTORY_TYPE)));
        assert!(!dirs_only.accepts(&info("f", FileFlags::FILE_TYPE)));
    }

    #[test]
    fn all_dirs_skips_name_filters() {
        let filters = DirFilters::FILES | DirFilters::ALL_DIRS;
        let state = IteratorState::new("/", filters, &["*.txt".into()]);
        assert!(state.accepts(&info("sub", FileFlags::DIRECTORY_TYPE)));
        assert!(state.accepts(&info("a.txt", FileFlags::FILE_TYPE)));
        assert!(!state.accepts(&info("a.rs", FileFlags::FILE_TYPE)));
    }

    #[test]
    fn hidden_and_symlink_filters() {
        let state = IteratorState::new("/", DirFilters::default() | DirFilters::NO_SYMLINKS, &[]);
        assert!(!state.accepts(&info(".git", FileFlags::DIRECTORY_TYPE | FileFlags::HIDDEN)));
        assert!(!state.accepts(&info("l", FileFlags::FILE_TYPE | FileFlags::LINK_TYPE)));

        let state = IteratorState::new("/", DirFilters::default() | DirFilters::HIDDEN, &[]);
        assert!(state.accepts(&info(".git", FileFlags::DIRECTORY_TYPE | FileFlags::HIDDEN)));
    }

    #[test]
    fn permission_filters() {
        let state = IteratorState::new("/", DirFilters::default() | DirFilters::WRITABLE, &[]);
        assert!(state.accepts(&info("w", FileFlags::FILE_TYPE | FileFlags::WRITE_USER)));
        assert!(!state.accepts(&info("r", FileFlags::FILE_TYPE | FileFlags::READ_USER)));
    }

    #[test]
    fn dot_entries() {
        let state = IteratorState::new("/", DirFilters::default() | DirFilters::NO_DOT_AND_DOT_DOT, &[]);
        assert!(!state.accepts(&info(".", FileFlags::DIRECTORY_TYPE)));
        assert!(!state.accepts(&info("..", FileFlags::DIRECTORY_TYPE)));
    }
}
