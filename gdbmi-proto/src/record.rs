//! MIレコードのデータモデル

/// コマンドと結果レコードを対応付けるトークン
pub type Token = u64;

/// フィールドの値
///
/// MIの値は文字列、リスト、タプルのいずれかで、再帰的にネストします。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Cスタイル文字列（エスケープ解除済み）
    String(String),
    /// `[...]` で囲まれたリスト
    List(Vec<Value>),
    /// `{...}` で囲まれたタプル
    Tuple(Tuple),
}

impl Value {
    /// 文字列値を取得する
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// リスト値を取得する
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// タプル値を取得する
    pub fn as_tuple(&self) -> Option<&Tuple> {
        match self {
            Value::Tuple(tuple) => Some(tuple),
            _ => None,
        }
    }
}

/// 順序付きのキー・値マッピング
///
/// MIのタプルはキーの重複を許すため、挿入順を保ったまま保持します。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tuple {
    entries: Vec<(String, Value)>,
}

impl Tuple {
    /// 空のタプルを作成する
    pub fn new() -> Self {
        Self::default()
    }

    /// 末尾にエントリを追加する
    pub fn push(&mut self, key: impl Into<String>, value: Value) {
        self.entries.push((key.into(), value));
    }

    /// キーに対応する最初の値を取得する
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// キーに対応する文字列値を取得する
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// 全エントリを順番に走査する
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, Value)> for Tuple {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// 結果レコード（`^`）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    pub token: Option<Token>,
    pub class: String,
    pub fields: Tuple,
}

impl ResultRecord {
    /// `^error` かどうか
    pub fn is_error(&self) -> bool {
        self.class == "error"
    }

    /// `^error` のメッセージを取得する
    pub fn error_message(&self) -> Option<&str> {
        if self.is_error() {
            self.fields.get_str("msg")
        } else {
            None
        }
    }
}

/// 非同期レコードの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncKind {
    /// `*` 実行状態の変化
    Exec,
    /// `+` 長時間処理の進捗
    Status,
    /// `=` 補足的な通知
    Notify,
}

/// 非同期レコード（`*` `+` `=`）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncRecord {
    pub token: Option<Token>,
    pub kind: AsyncKind,
    pub class: String,
    pub fields: Tuple,
}

/// ストリームレコードの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// `~` コンソール出力
    Console,
    /// `@` ターゲット出力
    Target,
    /// `&` GDB内部のログ
    Log,
}

/// ストリームレコード（`~` `@` `&`）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    pub kind: StreamKind,
    pub text: String,
}

/// 1行分のMI出力
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Result(ResultRecord),
    Async(AsyncRecord),
    Stream(StreamRecord),
}

impl Record {
    /// レコードに付与されたトークンを取得する
    pub fn token(&self) -> Option<Token> {
        match self {
            Record::Result(r) => r.token,
            Record::Async(r) => r.token,
            Record::Stream(_) => None,
        }
    }

    /// 結果レコードであれば参照を返す
    pub fn as_result(&self) -> Option<&ResultRecord> {
        match self {
            Record::Result(r) => Some(r),
            _ => None,
        }
    }

    /// 指定した種類・クラスの非同期レコードかどうか
    pub fn is_async(&self, kind: AsyncKind, class: &str) -> bool {
        matches!(self, Record::Async(r) if r.kind == kind && r.class == class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuple_keeps_duplicate_keys_in_order() {
        let tuple: Tuple = vec![
            ("thread-id".to_string(), Value::String("1".to_string())),
            ("thread-id".to_string(), Value::String("2".to_string())),
        ]
        .into_iter()
        .collect();

        assert_eq!(tuple.len(), 2);
        assert_eq!(tuple.get_str("thread-id"), Some("1"));
        let keys: Vec<&str> = tuple.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["thread-id", "thread-id"]);
    }

    #[test]
    fn test_error_message_only_for_error_class() {
        let mut fields = Tuple::new();
        fields.push("msg", Value::String("no symbol".to_string()));
        let error = ResultRecord {
            token: Some(1),
            class: "error".to_string(),
            fields: fields.clone(),
        };
        let done = ResultRecord {
            token: Some(2),
            class: "done".to_string(),
            fields,
        };

        assert_eq!(error.error_message(), Some("no symbol"));
        assert_eq!(done.error_message(), None);
    }
}
