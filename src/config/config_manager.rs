// ==========================================
// 订单产能管控 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::capacity_config::{CapacityConfig, ProductConversion};
use crate::db::SharedConnection;
use rusqlite::params;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::error::Error;

/// 配置键
pub mod config_keys {
    pub const DEFAULT_CEILING_KG: &str = "default_ceiling_kg";
    pub const DEFAULT_WARN_THRESHOLD_PCT: &str = "default_warn_threshold_pct";
    pub const FUZZY_PRODUCT_MATCH: &str = "fuzzy_product_match";
    pub const REQUIRE_PIECE_RATIO: &str = "require_piece_ratio";
    pub const COMPOSITE_SKIP_LIST: &str = "composite_skip_list";
    pub const PRODUCT_CONVERSIONS: &str = "product_conversions";
    pub const PRODUCT_ALIASES: &str = "product_aliases";
    pub const LEDGER_RETRY_ATTEMPTS: &str = "ledger_retry_attempts";
}

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: SharedConnection,
}

impl ConfigManager {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    pub fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 写入配置值（UPSERT）
    pub fn set_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 加载产能配置快照
    ///
    /// 单项格式错误只记警告并使用默认值，不阻断启动。
    pub fn load_capacity_config(&self) -> Result<CapacityConfig, Box<dyn Error>> {
        let defaults = CapacityConfig::default();

        let config = CapacityConfig {
            default_ceiling_kg: self
                .parsed(config_keys::DEFAULT_CEILING_KG, defaults.default_ceiling_kg)?
                .max(0.0),
            default_warn_threshold_pct: self
                .parsed(
                    config_keys::DEFAULT_WARN_THRESHOLD_PCT,
                    defaults.default_warn_threshold_pct,
                )?
                .clamp(0.0, 100.0),
            fuzzy_product_match: self
                .flag(config_keys::FUZZY_PRODUCT_MATCH, defaults.fuzzy_product_match)?,
            require_piece_ratio: self
                .flag(config_keys::REQUIRE_PIECE_RATIO, defaults.require_piece_ratio)?,
            composite_skip_list: self
                .json(config_keys::COMPOSITE_SKIP_LIST, defaults.composite_skip_list)?,
            product_conversions: self.json::<HashMap<String, ProductConversion>>(
                config_keys::PRODUCT_CONVERSIONS,
                defaults.product_conversions,
            )?,
            product_aliases: self.json::<HashMap<String, Vec<String>>>(
                config_keys::PRODUCT_ALIASES,
                defaults.product_aliases,
            )?,
            ledger_retry_attempts: self
                .parsed(config_keys::LEDGER_RETRY_ATTEMPTS, defaults.ledger_retry_attempts)?
                .max(1),
        };

        Ok(config)
    }

    fn parsed<T>(&self, key: &str, default: T) -> Result<T, Box<dyn Error>>
    where
        T: std::str::FromStr + Copy + std::fmt::Debug,
    {
        let Some(raw) = self.get_config_value(key)? else {
            return Ok(default);
        };
        Ok(raw.trim().parse::<T>().unwrap_or_else(|_| {
            tracing::warn!(config_key = key, raw_value = %raw, default = ?default, "配置格式错误，使用默认值");
            default
        }))
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, Box<dyn Error>> {
        let Some(raw) = self.get_config_value(key)? else {
            return Ok(default);
        };
        match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "y" | "on" => Ok(true),
            "0" | "false" | "no" | "n" | "off" => Ok(false),
            _ => {
                tracing::warn!(config_key = key, raw_value = %raw, "配置格式错误，使用默认值");
                Ok(default)
            }
        }
    }

    fn json<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, Box<dyn Error>> {
        let Some(raw) = self.get_config_value(key)? else {
            return Ok(default);
        };
        match serde_json::from_str(&raw) {
            Ok(v) => Ok(v),
            Err(e) => {
                tracing::warn!(config_key = key, error = %e, "配置 JSON 格式错误，使用默认值");
                Ok(default)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;
    use rusqlite::Connection;
    use std::sync::{Arc, Mutex};

    fn manager() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        ConfigManager::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn test_defaults_when_empty() {
        let config = manager().load_capacity_config().unwrap();
        assert_eq!(config, CapacityConfig::default());
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let manager = manager();
        manager.set_config_value(config_keys::DEFAULT_CEILING_KG, "25.5").unwrap();
        manager.set_config_value(config_keys::FUZZY_PRODUCT_MATCH, "off").unwrap();
        manager
            .set_config_value(
                config_keys::PRODUCT_CONVERSIONS,
                r#"{"Bignè": {"piecesPerKg": 40}, "Pasticcini": {"pricePerKg": 32.0}}"#,
            )
            .unwrap();
        manager
            .set_config_value(config_keys::LEDGER_RETRY_ATTEMPTS, "tre")
            .unwrap();
        manager
            .set_config_value(config_keys::PRODUCT_ALIASES, "not json")
            .unwrap();

        let config = manager.load_capacity_config().unwrap();
        assert_eq!(config.default_ceiling_kg, 25.5);
        assert!(!config.fuzzy_product_match);
        assert_eq!(
            config.product_conversions["Bignè"].pieces_per_kg,
            Some(40.0)
        );
        assert_eq!(
            config.product_conversions["Pasticcini"].price_per_kg,
            Some(32.0)
        );
        // 格式错误的项回落到默认值
        assert_eq!(config.ledger_retry_attempts, 3);
        assert!(config.product_aliases.is_empty());
    }
}
