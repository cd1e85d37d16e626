use std::fmt;

use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const MAX_TARGET_LEN: usize = 512;
pub const MAX_OWNER_LEN: usize = 128;

/// 限流的端点分类，每类有独立的配额
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EndpointClass {
    Submission,
    Status,
    Admin,
}

impl EndpointClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointClass::Submission => "submission",
            EndpointClass::Status => "status",
            EndpointClass::Admin => "admin",
        }
    }
}

impl fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 分析参数的规范化哈希
///
/// 对象键按字典序排列后序列化，再取 SHA-256 的前16个十六进制字符。
/// 相同语义的参数无论键顺序如何都得到相同的哈希。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParamsHash(String);

impl ParamsHash {
    pub fn of(params: &serde_json::Value) -> Self {
        let canonical = canonical_json(params);
        let digest = Sha256::digest(canonical.as_bytes());
        let hex = format!("{digest:x}");
        Self(hex[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ParamsHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::Value::String(k.clone()),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        serde_json::Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}

/// 同一 owner 对同一 target 同时最多一个进行中的任务
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub owner: String,
    pub target: String,
}

impl DedupKey {
    pub fn new(owner: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            target: target.into(),
        }
    }

    /// `task-slot:{owner字节长度}:{owner}:{target}`，长度前缀使不同的 (owner, target) 组合互不相同
    pub fn slot_key(&self) -> String {
        format!("task-slot:{}:{}:{}", self.owner.len(), self.owner, self.target)
    }
}

/// 分析结果的缓存引用，由 target 和参数哈希唯一确定
pub fn result_ref(target: &str, params_hash: &str) -> String {
    format!("analysis:{target}:{params_hash}")
}

pub fn validate_owner(owner: &str) -> OrchestratorResult<()> {
    let trimmed = owner.trim();
    if trimmed.is_empty() {
        return Err(OrchestratorError::validation("owner不能为空"));
    }
    if owner.len() > MAX_OWNER_LEN {
        return Err(OrchestratorError::validation(format!(
            "owner长度不能超过{MAX_OWNER_LEN}个字符"
        )));
    }
    if owner.contains(char::is_whitespace) {
        return Err(OrchestratorError::validation("owner不能包含空白字符"));
    }
    Ok(())
}

pub fn validate_target(target: &str) -> OrchestratorResult<()> {
    if target.trim().is_empty() {
        return Err(OrchestratorError::validation("target不能为空"));
    }
    if target.len() > MAX_TARGET_LEN {
        return Err(OrchestratorError::validation(format!(
            "target长度不能超过{MAX_TARGET_LEN}个字符"
        )));
    }
    if target.chars().any(char::is_control) {
        return Err(OrchestratorError::validation("target不能包含控制字符"));
    }
    Ok(())
}

pub fn validate_params(params: &serde_json::Value) -> OrchestratorResult<()> {
    if !(params.is_object() || params.is_null()) {
        return Err(OrchestratorError::validation("params必须是JSON对象"));
    }
    Ok(())
}
