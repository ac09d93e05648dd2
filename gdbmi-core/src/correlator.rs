//! トークンによるコマンドと結果の対応付け

use crate::errors::Error;
use crate::Result;
use gdbmi_proto::{ResultRecord, Token};
use std::collections::BTreeMap;

/// トークン管理
///
/// セッションごとに単調増加するカウンタと、応答待ちのトークン表を持ちます。
/// 結果は発行順ではなくトークンで照合するため、到着順が入れ替わっても正しい呼び出し元に届きます。
#[derive(Debug, Default)]
pub struct Correlator {
    next_token: Token,
    outstanding: BTreeMap<Token, Option<ResultRecord>>,
}

impl Correlator {
    /// 新しいトークン管理を作成する
    pub fn new() -> Self {
        Self::default()
    }

    /// 次のトークンを発行する（再利用されない）
    pub fn issue(&mut self) -> Token {
        let token = self.next_token;
        self.next_token += 1;
        self.outstanding.insert(token, None);
        token
    }

    /// 結果レコードを対応するトークンに届ける
    ///
    /// 同じトークンの結果が複数届いた場合は最後のものが残る。
    pub fn deliver(&mut self, record: ResultRecord) -> Result<()> {
        let token = record.token.ok_or(Error::UnmatchedResult)?;
        match self.outstanding.get_mut(&token) {
            Some(slot) => {
                *slot = Some(record);
                Ok(())
            }
            None => Err(Error::UnexpectedToken(token)),
        }
    }

    /// 届いた結果を取り出し、トークンを退役させる
    ///
    /// まだ結果が届いていない場合は `None` を返し、トークンは応答待ちのまま残る。
    pub fn take(&mut self, token: Token) -> Option<ResultRecord> {
        let record = self.outstanding.get_mut(&token)?.take()?;
        self.outstanding.remove(&token);
        Some(record)
    }

    pub fn is_outstanding(&self, token: Token) -> bool {
        self.outstanding.contains_key(&token)
    }

    /// 応答待ちのトークン数
    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gdbmi_proto::{Tuple, Value};

    fn result(token: Token, marker: &str) -> ResultRecord {
        let mut fields = Tuple::new();
        fields.push("marker", Value::String(marker.to_string()));
        ResultRecord {
            token: Some(token),
            class: "done".to_string(),
            fields,
        }
    }

    #[test]
    fn test_tokens_are_monotonic() {
        let mut correlator = Correlator::new();
        assert_eq!(correlator.issue(), 0);
        assert_eq!(correlator.issue(), 1);
        assert_eq!(correlator.issue(), 2);
        assert_eq!(correlator.outstanding_count(), 3);
    }

    #[test]
    fn test_out_of_order_delivery() {
        let mut correlator = Correlator::new();
        let tokens: Vec<Token> = (0..3).map(|_| correlator.issue()).collect();

        for token in [2, 0, 1] {
            correlator.deliver(result(token, &format!("r{token}"))).unwrap();
        }

        for token in tokens {
            let record = correlator.take(token).unwrap();
            assert_eq!(record.token, Some(token));
            assert_eq!(record.fields.get_str("marker"), Some(format!("r{token}").as_str()));
        }
        assert_eq!(correlator.outstanding_count(), 0);
    }

    #[test]
    fn test_take_before_delivery_keeps_token() {
        let mut correlator = Correlator::new();
        let token = correlator.issue();
        assert!(correlator.take(token).is_none());
        assert!(correlator.is_outstanding(token));
    }

    #[test]
    fn test_last_result_wins() {
        let mut correlator = Correlator::new();
        let token = correlator.issue();
        correlator.deliver(result(token, "first")).unwrap();
        correlator.deliver(result(token, "second")).unwrap();
        assert_eq!(
            correlator.take(token).unwrap().fields.get_str("marker"),
            Some("second")
        );
    }

    #[test]
    fn test_unknown_and_retired_tokens_are_rejected() {
        let mut correlator = Correlator::new();
        assert!(matches!(
            correlator.deliver(result(5, "x")),
            Err(Error::UnexpectedToken(5))
        ));

        let token = correlator.issue();
        correlator.deliver(result(token, "x")).unwrap();
        correlator.take(token).unwrap();
        // 退役したトークンは再利用されない
        assert!(matches!(
            correlator.deliver(result(token, "y")),
            Err(Error::UnexpectedToken(0))
        ));
        assert_eq!(correlator.issue(), 1);
    }

    #[test]
    fn test_tokenless_result_is_rejected() {
        let mut correlator = Correlator::new();
        correlator.issue();
        let mut record = result(0, "x");
        record.token = None;
        let err = correlator.deliver(record).unwrap_err();
        assert!(err.is_protocol_violation());
    }
}
