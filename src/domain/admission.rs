// ==========================================
// 订单产能管控 - 准入检查结果
// ==========================================
// 阻断/预警是正常的结果值，不是错误
// ==========================================

use crate::domain::types::{LimitUnit, ScopeKind};
use serde::{Deserialize, Serialize};

// ==========================================
// FindingSeverity - 检查发现的级别
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingSeverity {
    Warning,  // 达到预警线，不阻断
    Blocking, // 超过上限，阻断
}

// ==========================================
// CapacityFinding - 单条检查发现
// ==========================================
// 数量单位均为限额记录的单位
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityFinding {
    pub limit_id: String,
    pub scope_kind: ScopeKind,
    pub name: String,
    pub requested: f64,
    pub available: f64,
    pub ceiling: f64,
    pub unit: LimitUnit,
    pub severity: FindingSeverity,
}

impl CapacityFinding {
    pub fn is_blocking(&self) -> bool {
        self.severity == FindingSeverity::Blocking
    }
}

// ==========================================
// AdmissionResult - 准入检查结果
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdmissionResult {
    pub ok: bool,
    pub findings: Vec<CapacityFinding>,
    /// 是否通过强制放行跳过了检查
    pub overridden: bool,
}

impl AdmissionResult {
    /// 未配置任何限额：不受约束
    pub fn unconstrained() -> Self {
        Self {
            ok: true,
            findings: Vec::new(),
            overridden: false,
        }
    }

    /// 强制放行：检查被完全跳过
    pub fn overridden() -> Self {
        Self {
            ok: true,
            findings: Vec::new(),
            overridden: true,
        }
    }

    pub fn from_findings(findings: Vec<CapacityFinding>) -> Self {
        let ok = !findings.iter().any(CapacityFinding::is_blocking);
        Self {
            ok,
            findings,
            overridden: false,
        }
    }

    pub fn blocking(&self) -> impl Iterator<Item = &CapacityFinding> {
        self.findings.iter().filter(|f| f.is_blocking())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &CapacityFinding> {
        self.findings.iter().filter(|f| !f.is_blocking())
    }
}
