//! MIコマンドの組み立て

use gdbmi_proto::Token;

/// パラメータの引用方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quote {
    /// ダブルクォートで囲み、`"` と `\` をエスケープする
    #[default]
    Always,
    /// そのまま送る（引用済みの値や `on`/`off` など）
    Never,
}

/// コマンドのパラメータ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub text: String,
    pub quoted: bool,
}

impl Param {
    fn render(&self) -> String {
        if self.quoted {
            quote(&self.text)
        } else {
            self.text.clone()
        }
    }
}

/// MIコマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiCommand {
    name: String,
    params: Vec<Param>,
}

impl MiCommand {
    /// パラメータなしのコマンドを作成する
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// 全パラメータに同じ引用方法を使ってコマンドを作成する
    pub fn with_params<S: AsRef<str>>(name: impl Into<String>, params: &[S], quote: Quote) -> Self {
        let quoted = quote == Quote::Always;
        Self {
            name: name.into(),
            params: params
                .iter()
                .map(|p| Param {
                    text: p.as_ref().to_string(),
                    quoted,
                })
                .collect(),
        }
    }

    /// コンソールコマンドを `-interpreter-exec console` で包む
    pub fn console(command: impl Into<String>) -> Self {
        Self::new("-interpreter-exec")
            .param("console")
            .param(command)
    }

    /// 引用するパラメータを追加する
    pub fn param(mut self, text: impl Into<String>) -> Self {
        self.params.push(Param {
            text: text.into(),
            quoted: true,
        });
        self
    }

    /// 引用しないパラメータを追加する
    pub fn raw_param(mut self, text: impl Into<String>) -> Self {
        self.params.push(Param {
            text: text.into(),
            quoted: false,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// トークンを割り当てる
    pub fn issue(self, token: Token) -> IssuedCommand {
        IssuedCommand {
            token,
            command: self,
        }
    }
}

/// トークンを割り当て済みのコマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCommand {
    token: Token,
    command: MiCommand,
}

impl IssuedCommand {
    pub fn token(&self) -> Token {
        self.token
    }

    pub fn command(&self) -> &MiCommand {
        &self.command
    }

    /// 送信する1行（改行なし）
    ///
    /// `<token><name> <param>...` の形式です。
    pub fn line(&self) -> String {
        let mut line = format!("{}{}", self.token, self.command.name);
        for param in &self.command.params {
            line.push(' ');
            line.push_str(&param.render());
        }
        line
    }
}

/// MIのCスタイル文字列として引用する
///
/// `"` と `\` をエスケープし、行区切りを壊さないよう制御文字もエスケープします。
pub fn quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}
