// ==========================================
// 订单产能管控 - 限额 CSV 导入
// ==========================================
// 列: data,prodotto,categoria,limite,unita,soglia（首行为表头）
// 约束: 全部行校验通过后才整体写入，任一行出错则不写入
// ==========================================

use std::io::Read;

use chrono::NaiveDate;

use crate::api::error::{ApiError, ApiResult};
use crate::api::limit_api::LimitApi;
use crate::domain::limit::{NewProductionLimit, ProductionLimit};

/// 解析限额 CSV
///
/// 空单元格视为未填写（由领域校验给出默认值或报错）；
/// 数字、日期格式错误按行号报告。
///
/// # 错误
/// - InvalidInput: CSV 结构错误、数字或日期无法解析、文件无数据行
pub fn parse_limits_csv<R: Read>(input: R) -> ApiResult<Vec<NewProductionLimit>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let mut limits = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let row_number = row_idx + 2; // 行号从1开始,且跳过header
        let record =
            result.map_err(|e| ApiError::InvalidInput(format!("第{}行: {}", row_number, e)))?;

        limits.push(NewProductionLimit {
            date: get_date_field(&record, 0, row_number)?,
            product: get_string_field(&record, 1),
            category: get_string_field(&record, 2),
            ceiling: get_f64_field(&record, 3, row_number)?,
            unit: get_string_field(&record, 4),
            warn_threshold_pct: get_f64_field(&record, 5, row_number)?,
        });
    }

    if limits.is_empty() {
        return Err(ApiError::InvalidInput("CSV 中没有限额数据".to_string()));
    }
    Ok(limits)
}

/// 解析并整体导入
pub fn import_limits_csv<R: Read>(
    api: &LimitApi,
    input: R,
    actor: &str,
) -> ApiResult<Vec<ProductionLimit>> {
    let limits = parse_limits_csv(input)?;
    tracing::info!(rows = limits.len(), actor, "开始导入限额 CSV");
    api.bulk_create(limits, actor)
}

// ==========================================
// 辅助方法: CSV字段解析
// ==========================================

fn get_string_field(record: &csv::StringRecord, index: usize) -> Option<String> {
    record
        .get(index)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn get_f64_field(
    record: &csv::StringRecord,
    index: usize,
    row_number: usize,
) -> ApiResult<Option<f64>> {
    get_string_field(record, index)
        .map(|s| {
            s.replace(',', ".").parse::<f64>().map_err(|_| {
                ApiError::InvalidInput(format!("第{}行第{}列: 无效数字 '{}'", row_number, index + 1, s))
            })
        })
        .transpose()
}

fn get_date_field(
    record: &csv::StringRecord,
    index: usize,
    row_number: usize,
) -> ApiResult<Option<NaiveDate>> {
    get_string_field(record, index)
        .map(|s| {
            NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .or_else(|_| NaiveDate::parse_from_str(&s, "%Y%m%d"))
                .map_err(|_| {
                    ApiError::InvalidInput(format!("第{}行: 无效日期 '{}'", row_number, s))
                })
        })
        .transpose()
}
