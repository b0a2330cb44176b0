// 限额批量导入工具：读取 CSV，全部行校验通过后整体写入。
//
// Usage:
//   cargo run --bin import_limits -- <csv_path> [--db db_path] [--operatore name]
//
// 列: data,prodotto,categoria,limite,unita,soglia

use std::fs::File;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use order_capacity::api::import_limits_csv;
use order_capacity::app::{get_default_db_path, AppState};
use order_capacity::logging;

struct Args {
    csv_path: String,
    db_path: String,
    actor: String,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut csv_path = None;
    let mut db_path = None;
    let mut actor = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--db" => db_path = Some(args.next().context("--db 需要参数")?),
            "--operatore" => actor = Some(args.next().context("--operatore 需要参数")?),
            other if other.starts_with("--") => bail!("未知参数: {}", other),
            other => {
                if csv_path.replace(other.to_string()).is_some() {
                    bail!("只能指定一个 CSV 文件");
                }
            }
        }
    }

    Ok(Args {
        csv_path: csv_path
            .context("用法: import_limits <csv_path> [--db db_path] [--operatore name]")?,
        db_path: db_path.unwrap_or_else(get_default_db_path),
        actor: actor.unwrap_or_else(|| "import_limits".to_string()),
    })
}

fn main() -> anyhow::Result<()> {
    logging::init();
    let args = parse_args()?;

    let state = Arc::new(AppState::new(args.db_path.clone()).map_err(|e| anyhow!(e))?);
    let file = File::open(&args.csv_path)
        .with_context(|| format!("无法打开 CSV 文件: {}", args.csv_path))?;

    let limits = import_limits_csv(&state.limit_api, file, &args.actor)
        .with_context(|| format!("导入失败，未写入任何记录: {}", args.csv_path))?;

    println!("imported={} db={}", limits.len(), args.db_path);
    Ok(())
}
