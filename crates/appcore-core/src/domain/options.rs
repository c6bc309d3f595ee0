//! Options - キーパスとマージ規則
//!
//! オプションは素の `serde_json::Value` ツリー。object は構造化された値として
//! キーごとにマージし、それ以外（文字列・数値・配列・真偽値）は丸ごと置き換える。
//! `null` とキー欠落はどちらも「未定義」扱い。

use std::fmt;

use serde_json::{Map, Value};

/// オプションツリー内のパス
///
/// ドット区切り文字列（`"db.pool.size"`）かセグメント列から作る。
/// 空文字列・空リストはルートを指す。
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str("<root>")
        } else {
            f.write_str(&self.0.join("."))
        }
    }
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        Self(
            path.split('.')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }
}

impl From<String> for KeyPath {
    fn from(path: String) -> Self {
        Self::from(path.as_str())
    }
}

impl From<&String> for KeyPath {
    fn from(path: &String) -> Self {
        Self::from(path.as_str())
    }
}

impl From<&[&str]> for KeyPath {
    fn from(segments: &[&str]) -> Self {
        Self(segments.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for KeyPath {
    fn from(segments: [&str; N]) -> Self {
        Self(segments.iter().map(|s| s.to_string()).collect())
    }
}

impl From<Vec<String>> for KeyPath {
    fn from(segments: Vec<String>) -> Self {
        Self(segments)
    }
}

impl From<&KeyPath> for KeyPath {
    fn from(path: &KeyPath) -> Self {
        path.clone()
    }
}

/// `merge` が既存キーをどう扱うか
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// source 側が勝つ（`set`）
    Overwrite,

    /// 未定義のキーだけ埋める（`defaults`、祖先の参照）
    FillMissing,
}

/// 値が定義済みか
pub fn is_defined(value: &Value) -> bool {
    !value.is_null()
}

/// `source` を `target` にマージ
///
/// object 同士は再帰的にマージ。それ以外は [`MergeMode::Overwrite`] なら置き換え、
/// [`MergeMode::FillMissing`] なら target が未定義のときだけ置き換える。
pub fn merge(target: &mut Value, source: Value, mode: MergeMode) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) if is_defined(existing) => merge(existing, value, mode),
                    _ => {
                        if mode == MergeMode::Overwrite || is_defined(&value) {
                            target.insert(key, value);
                        }
                    }
                }
            }
        }
        (target, source) => {
            if mode == MergeMode::Overwrite || !is_defined(target) {
                *target = source;
            }
        }
    }
}

/// `path` の値
pub fn lookup<'a>(tree: &'a Value, path: &KeyPath) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(tree, |node, segment| node.as_object()?.get(segment))
}

/// `path` に `value` を書き込む（途中の object は作成）
///
/// 途中にスカラーがあれば object で置き換える。ルートへの書き込みはツリー全体の置き換え。
pub fn insert(tree: &mut Value, path: &KeyPath, value: Value) {
    let Some((last, parents)) = path.segments().split_last() else {
        *tree = value;
        return;
    };

    let mut node = tree;
    for segment in parents {
        node = object_mut(node)
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    object_mut(node).insert(last.clone(), value);
}

/// `path` の値を削除し、削除した値を返す
///
/// ルートを削除すると空の object が残る。
pub fn remove(tree: &mut Value, path: &KeyPath) -> Option<Value> {
    let Some((last, parents)) = path.segments().split_last() else {
        return Some(std::mem::replace(tree, Value::Object(Map::new())));
    };

    let mut node = tree;
    for segment in parents {
        node = node.as_object_mut()?.get_mut(segment)?;
    }
    node.as_object_mut()?.remove(last)
}

fn object_mut(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just replaced by an object"),
    }
}
