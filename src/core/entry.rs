//! 同步树的数据模型
//!
//! `RelPath` 按路径段逐段比较，因此在 `BTreeMap` 中任何目录都排在其子孙之前。

use crate::storage::Capabilities;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// 相对同步根目录的路径（路径段序列，与分隔符无关）
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelPath(Vec<String>);

impl RelPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// 解析 `/` 或 `\` 分隔的路径，忽略空段和 `.`
    pub fn parse(path: &str) -> Self {
        Self(
            path.split(['/', '\\'])
                .filter(|s| !s.is_empty() && *s != ".")
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn name(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<RelPath> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    pub fn join(&self, name: &str) -> RelPath {
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        Self(segments)
    }

    /// `self` 是否是 `other` 的真祖先
    pub fn is_ancestor_of(&self, other: &RelPath) -> bool {
        self.0.len() < other.0.len() && other.0.starts_with(&self.0)
    }

    /// 存储层使用的 `/` 分隔形式，根目录为空串
    pub fn as_storage_path(&self) -> String {
        self.0.join("/")
    }

    /// 沿父目录链向上迭代（不含自身，含根）
    pub fn ancestors(&self) -> impl Iterator<Item = RelPath> + '_ {
        (0..self.0.len()).rev().map(move |n| Self(self.0[..n].to_vec()))
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, ".")
        } else {
            write!(f, "{}", self.0.join("/"))
        }
    }
}

impl Serialize for RelPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl From<&str> for RelPath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::File => write!(f, "file"),
            EntryKind::Directory => write!(f, "directory"),
        }
    }
}

/// 单个文件或目录的规范化元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub path: RelPath,
    pub kind: EntryKind,
    /// 目录恒为 0
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// 仅在 checksum 比较策略下填充
    pub checksum: Option<String>,
    /// 存储层标识，只用于存储调用，不参与比较
    #[serde(skip)]
    pub id: String,
}

impl Entry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// 一次完整列举的结果：相对路径 -> 条目
#[derive(Debug, Clone)]
pub struct Tree {
    entries: BTreeMap<RelPath, Entry>,
    capabilities: Capabilities,
    /// 被跳过的符号链接和特殊对象
    skipped: Vec<RelPath>,
}

impl Tree {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            entries: BTreeMap::new(),
            capabilities,
            skipped: Vec::new(),
        }
    }

    pub fn insert(&mut self, entry: Entry) {
        self.entries.insert(entry.path.clone(), entry);
    }

    pub fn get(&self, path: &RelPath) -> Option<&Entry> {
        self.entries.get(path)
    }

    pub fn get_mut(&mut self, path: &RelPath) -> Option<&mut Entry> {
        self.entries.get_mut(path)
    }

    pub fn contains(&self, path: &RelPath) -> bool {
        self.entries.contains_key(path)
    }

    /// 按路径顺序迭代，目录先于其子孙
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn skipped(&self) -> &[RelPath] {
        &self.skipped
    }

    pub(crate) fn record_skipped(&mut self, path: RelPath) {
        self.skipped.push(path);
    }

    pub fn file_count(&self) -> usize {
        self.entries.values().filter(|e| e.is_file()).count()
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_separator_agnostic() {
        assert_eq!(RelPath::parse("a/b\\c"), RelPath::parse("/a/b/c/"));
        assert_eq!(RelPath::parse("./a//b").segments(), ["a", "b"]);
        assert!(RelPath::parse("").is_root());
    }

    #[test]
    fn test_directory_sorts_before_descendants() {
        let mut paths = vec![
            RelPath::parse("docs-old"),
            RelPath::parse("docs/x.txt"),
            RelPath::parse("docs"),
            RelPath::parse("a.txt"),
            RelPath::parse("docs/sub/y.txt"),
        ];
        paths.sort();
        let rendered: Vec<_> = paths.iter().map(|p| p.to_string()).collect();
        assert_eq!(
            rendered,
            ["a.txt", "docs", "docs/sub/y.txt", "docs/x.txt", "docs-old"]
        );
    }

    #[test]
    fn test_ancestors() {
        let path = RelPath::parse("a/b/c");
        let ancestors: Vec<_> = path.ancestors().map(|p| p.to_string()).collect();
        assert_eq!(ancestors, ["a/b", "a", "."]);
        assert!(RelPath::parse("a").is_ancestor_of(&path));
        assert!(!path.is_ancestor_of(&path));
        assert!(!RelPath::parse("a/bc").is_ancestor_of(&RelPath::parse("a/b/c")));
    }
}
