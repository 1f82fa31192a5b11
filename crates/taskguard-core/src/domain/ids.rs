//! Run identifiers.
//!
//! # RunId
//! 取得（acquire）が成功するたびに新しい RunId が発行されます。
//! release / renew は取得時の RunId を提示しなければならず、
//! これによって古いワーカーの遅延書き込みを拒否します（stale-write rejection）。
//!
//! ULID を使う理由:
//! - **時刻でソート可能**: ログを並べたときに取得順がわかる
//! - **分散生成可能**: ワーカー間の調整が不要
//! - **UUID互換**: 128-bit

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Identifier of one execution attempt holding a lock.
///
/// Serialized as the bare ULID string; `Display` adds a `run-` prefix for logs.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Ulid);

impl RunId {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for RunId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = ulid::DecodeError;

    /// Accepts both the bare ULID and the `run-` prefixed display form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("run-").unwrap_or(s);
        Ulid::from_string(raw).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_has_run_prefix() {
        let id = RunId::from_ulid(Ulid::new());
        assert!(id.to_string().starts_with("run-"));
    }

    #[test]
    fn serializes_as_bare_ulid() {
        let ulid = Ulid::new();
        let id = RunId::from(ulid);

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", ulid));

        let back: RunId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn parses_display_and_bare_forms() {
        let id = RunId::from_ulid(Ulid::new());
        assert_eq!(id.to_string().parse::<RunId>().unwrap(), id);
        assert_eq!(id.as_ulid().to_string().parse::<RunId>().unwrap(), id);
        assert!("run-not-a-ulid".parse::<RunId>().is_err());
    }

    #[test]
    fn run_ids_are_sortable() {
        // ULID は時刻ベースなので、生成順序でソート可能
        let id1 = RunId::from_ulid(Ulid::new());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = RunId::from_ulid(Ulid::new());
        assert!(id1 < id2);
    }
}
