//! ConfigStore - 階層化されたオプション
//!
//! 各アプリケーションはオプションツリーを 1 つ持つ。読み込みは外側へたどる:
//! 自分の値 -> 親 -> 祖父母 -> ... -> 組み込みデフォルト。
//! 各段はまだ未定義の部分だけを埋める。書き込みは自分のツリーにしか触れない。

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use crate::domain::options::{self, KeyPath, MergeMode};
use crate::domain::AppError;

use super::Application;

/// `public_options` で公開するオプションパスの一覧を持つキー
pub const PUBLIC_KEYS: &str = "publicKeys";

/// `public_options` に追加でマージする値を持つキー
pub const PUBLIC_OPTIONS: &str = "publicOptions";

/// 1 アプリケーションが持つオプションツリー。ルートは常に object
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigStore {
    tree: Value,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self {
            tree: Value::Object(Map::new()),
        }
    }

    /// 組み込みデフォルト。すべての参照の最後の層
    pub fn builtin_defaults() -> Value {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        json!({
            "cwd": cwd.to_string_lossy(),
            "env": "development",
            "publicKeys": ["env"],
        })
    }

    pub fn tree(&self) -> &Value {
        &self.tree
    }

    pub fn lookup(&self, path: &KeyPath) -> Option<&Value> {
        options::lookup(&self.tree, path)
    }

    /// `path` の値に `value` をマージ（source 側が勝つ）
    pub fn set(&mut self, path: &KeyPath, value: Value) -> Result<(), AppError> {
        self.write(path, value, Some(MergeMode::Overwrite))
    }

    /// `path` の値に `value` をマージ（未定義のキーだけ埋める）
    pub fn defaults(&mut self, path: &KeyPath, value: Value) -> Result<(), AppError> {
        self.write(path, value, Some(MergeMode::FillMissing))
    }

    /// `path` の値をマージせずに置き換える
    ///
    /// ルートを `null` にするとツリーは空になる。
    pub fn reset(&mut self, path: &KeyPath, value: Value) -> Result<(), AppError> {
        self.write(path, value, None)
    }

    /// `path` の値を削除。ルートを削除するとツリーは空になる
    pub fn unset(&mut self, path: &KeyPath) {
        options::remove(&mut self.tree, path);
    }

    fn write(&mut self, path: &KeyPath, value: Value, mode: Option<MergeMode>) -> Result<(), AppError> {
        if path.is_root() {
            let value = if value.is_null() { Value::Object(Map::new()) } else { value };
            if !value.is_object() {
                return Err(AppError::invalid_option(
                    path,
                    "the option root must be a key/value object",
                ));
            }
            match mode {
                Some(mode) => options::merge(&mut self.tree, value, mode),
                None => self.tree = value,
            }
            return Ok(());
        }

        let merged = match mode {
            Some(mode) => {
                let mut current = self.lookup(path).cloned().unwrap_or(Value::Null);
                options::merge(&mut current, value, mode);
                current
            }
            None => value,
        };
        options::insert(&mut self.tree, path, merged);
        Ok(())
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Application {
    /// `path` の解決済みの値（`""` はツリー全体）
    ///
    /// 自分の値、近い祖先から順に各祖先、組み込みデフォルトの順に重ねる。
    /// 後の層は未定義の部分だけを埋める。どこにもなければ `Value::Null`。
    /// 戻り値はコピー。
    pub fn get(&self, path: impl Into<KeyPath>) -> Value {
        let path = path.into();
        let mut value = self.own_option(&path).unwrap_or(Value::Null);
        if path.is_root() && value.is_null() {
            value = Value::Object(Map::new());
        }

        for ancestor in self.ancestors() {
            if let Some(inherited) = ancestor.own_option(&path) {
                options::merge(&mut value, inherited, MergeMode::FillMissing);
            }
        }
        if let Some(fallback) = options::lookup(&self.inner.defaults, &path) {
            options::merge(&mut value, fallback.clone(), MergeMode::FillMissing);
        }
        value
    }

    /// `path` の解決済みの値をデシリアライズ
    ///
    /// どこにも定義がなければ `Ok(None)`
    pub fn get_as<T: DeserializeOwned>(&self, path: impl Into<KeyPath>) -> Result<Option<T>, AppError> {
        let path = path.into();
        let value = self.get(&path);
        if value.is_null() {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|source| AppError::OptionType {
                path: path.to_string(),
                source,
            })
    }

    /// 継承を含まない自分のツリーのスナップショット
    pub fn own_options(&self) -> Value {
        self.inner.config.borrow().tree().clone()
    }

    /// このアプリケーションのオプションの `path` に `value` をマージ
    ///
    /// # Errors
    /// `path` がルートで `value` が object でなければ `AppError::InvalidOption`
    pub fn set(&self, path: impl Into<KeyPath>, value: Value) -> Result<&Self, AppError> {
        self.inner.config.borrow_mut().set(&path.into(), value)?;
        Ok(self)
    }

    /// [`Application::set`] と同じだが、未定義のキーだけ埋める
    pub fn defaults(&self, path: impl Into<KeyPath>, value: Value) -> Result<&Self, AppError> {
        self.inner.config.borrow_mut().defaults(&path.into(), value)?;
        Ok(self)
    }

    /// `path` の値をマージせずに置き換える
    pub fn reset(&self, path: impl Into<KeyPath>, value: Value) -> Result<&Self, AppError> {
        self.inner.config.borrow_mut().reset(&path.into(), value)?;
        Ok(self)
    }

    /// `path` の値を削除し、継承された値を再び見えるようにする
    pub fn unset(&self, path: impl Into<KeyPath>) -> &Self {
        self.inner.config.borrow_mut().unset(&path.into());
        self
    }

    /// 解決済みの `env` オプション
    pub fn env(&self) -> Option<String> {
        self.get("env").as_str().map(str::to_string)
    }

    /// 解決済みの `cwd` オプション
    pub fn cwd(&self) -> Option<PathBuf> {
        self.get("cwd").as_str().map(PathBuf::from)
    }

    /// 信頼度の低い利用者に渡してよいオプション
    ///
    /// `publicKeys`（配列、単一文字列、null のいずれか）に並ぶパスから組み立て、
    /// その上に `publicOptions` を重ねる。
    pub fn public_options(&self) -> Value {
        let keys: Vec<String> = match self.get(PUBLIC_KEYS) {
            Value::Array(keys) => keys
                .into_iter()
                .filter_map(|key| key.as_str().map(str::to_string))
                .collect(),
            Value::String(key) => vec![key],
            _ => Vec::new(),
        };

        let mut exported = Value::Object(Map::new());
        for key in keys {
            let path = KeyPath::from(key.as_str());
            options::insert(&mut exported, &path, self.get(&path));
        }
        let extra = self.get(PUBLIC_OPTIONS);
        if extra.is_object() {
            options::merge(&mut exported, extra, MergeMode::Overwrite);
        }
        exported
    }

    /// `publicOptions` に値を追加
    pub fn set_public_option(&self, path: impl Into<KeyPath>, value: Value) -> Result<&Self, AppError> {
        let mut store = ConfigStore::new();
        store.set(&KeyPath::root(), self.get(PUBLIC_OPTIONS))?;
        store.set(&path.into(), value)?;
        self.set(PUBLIC_OPTIONS, store.tree().clone())
    }

    fn own_option(&self, path: &KeyPath) -> Option<Value> {
        self.inner.config.borrow().lookup(path).cloned()
    }
}
