// ==========================================
// 订单产能管控 - 产品名称匹配
// ==========================================
// 职责: 把订单行的自由文本产品名关联到按产品配置的限额记录
// 顺序: 精确（归一化后相等） → 别名表 → 子串回退（可关闭）
// 红线: 子串只是回退手段；存在精确/别名命中时不得走子串
// ==========================================

use crate::domain::limit::normalize_name;
use std::collections::HashMap;

/// 命中方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Alias,
    Substring,
}

// ==========================================
// ProductMatcher - 产品名称匹配器
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct ProductMatcher {
    /// 归一化别名 → 归一化产品名
    aliases: HashMap<String, String>,
    fuzzy: bool,
}

impl ProductMatcher {
    /// # 参数
    /// - aliases: 产品名 → 可接受的别名列表
    /// - fuzzy: 是否启用子串回退
    pub fn new(aliases: &HashMap<String, Vec<String>>, fuzzy: bool) -> Self {
        let mut table = HashMap::new();
        for (product, names) in aliases {
            let canonical = normalize_name(product);
            for alias in names {
                let alias = normalize_name(alias);
                if alias.is_empty() || alias == canonical {
                    continue;
                }
                if let Some(previous) = table.insert(alias.clone(), canonical.clone()) {
                    if previous != canonical {
                        tracing::warn!(
                            alias = %alias,
                            previous = %previous,
                            current = %canonical,
                            "别名被多个产品声明，以后者为准"
                        );
                    }
                }
            }
        }
        Self {
            aliases: table,
            fuzzy,
        }
    }

    /// 名称的规范形式（别名解析后）
    pub fn canonical(&self, name: &str) -> String {
        let normalized = normalize_name(name);
        match self.aliases.get(&normalized) {
            Some(canonical) => canonical.clone(),
            None => normalized,
        }
    }

    /// 在候选记录名中为订单行名称选择一条记录
    ///
    /// 子串回退时订单行名称须包含记录名；多条命中取最长（最具体）的记录名。
    ///
    /// # 返回
    /// (候选下标, 命中方式)；无命中返回 None
    pub fn resolve(&self, item_name: &str, candidates: &[&str]) -> Option<(usize, MatchKind)> {
        let item_norm = normalize_name(item_name);
        if item_norm.is_empty() {
            return None;
        }

        let normalized: Vec<String> = candidates.iter().map(|c| normalize_name(c)).collect();

        if let Some(idx) = normalized.iter().position(|c| *c == item_norm) {
            return Some((idx, MatchKind::Exact));
        }

        let item_canon = self.canonical(&item_norm);
        if let Some(idx) = normalized
            .iter()
            .position(|c| !c.is_empty() && self.canonical(c) == item_canon)
        {
            return Some((idx, MatchKind::Alias));
        }

        if !self.fuzzy {
            return None;
        }

        let hit = normalized
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_empty() && item_norm.contains(c.as_str()))
            .max_by_key(|(_, c)| c.len())
            .map(|(idx, _)| idx);

        if let Some(idx) = hit {
            tracing::debug!(
                item = %item_name,
                record = %candidates[idx],
                "产品名称按子串匹配"
            );
            return Some((idx, MatchKind::Substring));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aliases() -> HashMap<String, Vec<String>> {
        let mut map = HashMap::new();
        map.insert(
            "Tortellini".to_string(),
            vec!["Tortellini in brodo".to_string(), "tortellino".to_string()],
        );
        map
    }

    #[test]
    fn test_exact_is_case_and_space_insensitive() {
        let matcher = ProductMatcher::new(&HashMap::new(), false);
        assert_eq!(
            matcher.resolve("  RAVIOLI  di magro", &["Lasagne", "Ravioli di Magro"]),
            Some((1, MatchKind::Exact))
        );
    }

    #[test]
    fn test_alias_table() {
        let matcher = ProductMatcher::new(&aliases(), false);
        assert_eq!(
            matcher.resolve("Tortellino", &["Ravioli", "Tortellini"]),
            Some((1, MatchKind::Alias))
        );
        assert_eq!(matcher.canonical("TORTELLINI IN BRODO"), "tortellini");
    }

    #[test]
    fn test_exact_record_wins_over_substring() {
        let matcher = ProductMatcher::new(&HashMap::new(), true);
        assert_eq!(
            matcher.resolve("Ravioli piccoli", &["Ravioli", "Ravioli piccoli"]),
            Some((1, MatchKind::Exact))
        );
    }

    #[test]
    fn test_substring_is_fallback_only() {
        let fuzzy = ProductMatcher::new(&HashMap::new(), true);
        assert_eq!(
            fuzzy.resolve("Ravioli piccoli", &["Ravioli"]),
            Some((0, MatchKind::Substring))
        );

        let strict = ProductMatcher::new(&HashMap::new(), false);
        assert_eq!(strict.resolve("Ravioli piccoli", &["Ravioli"]), None);
    }

    #[test]
    fn test_substring_prefers_most_specific() {
        let matcher = ProductMatcher::new(&HashMap::new(), true);
        assert_eq!(
            matcher.resolve("Torta di mele grande", &["Torta", "Torta di mele"]),
            Some((1, MatchKind::Substring))
        );
    }
}
