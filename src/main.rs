// ==========================================
// 线索导入系统 - 命令行入口
// ==========================================
// 子命令: preview / import / save-mapping / list-mappings / delete-mapping
//         show-run / list-runs / error-report / set-credential
// 输出: JSON 写 stdout，日志写 stderr
// ==========================================

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use lead_intake::api::{ImportApi, SourceDescriptor};
use lead_intake::domain::{ImportContext, RawFieldMapping};
use lead_intake::repository::{ConnectorCredential, PROVIDER_GOOGLE_SHEETS};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lead-intake", author, version, about = "线索数据导入（CSV / Excel / 在线表格）")]
struct Cli {
    /// 数据库路径（默认读取 LEAD_INTAKE_DB_PATH 或用户数据目录）
    #[arg(long, global = true)]
    db: Option<String>,

    /// 组织 ID
    #[arg(long, global = true, default_value = "default")]
    org: String,

    /// 操作人
    #[arg(long, global = true)]
    user: Option<String>,

    /// JSON 格式日志
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// csv | excel | google_sheets
    #[arg(long, default_value = "csv")]
    source_type: String,

    /// 本地文件（CSV / Excel）
    #[arg(long)]
    file: Option<PathBuf>,

    /// 公开表格分享链接
    #[arg(long)]
    sheet_url: Option<String>,

    /// 私有表格 ID
    #[arg(long)]
    spreadsheet_id: Option<String>,

    /// 工作表名（Excel 可选；私有表格必填）
    #[arg(long)]
    sheet_name: Option<String>,
}

impl SourceArgs {
    fn into_descriptor(self) -> SourceDescriptor {
        SourceDescriptor {
            source_type: self.source_type,
            data: None,
            file_path: self.file.map(|p| p.to_string_lossy().into_owned()),
            file_name: None,
            sheet_url: self.sheet_url,
            spreadsheet_id: self.spreadsheet_id,
            sheet_name: self.sheet_name,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// 预览（不落库）
    Preview {
        #[command(flatten)]
        source: SourceArgs,
        /// 映射: JSON 文件路径或内联 JSON
        #[arg(long)]
        mapping: Option<String>,
    },
    /// 执行导入
    Import {
        #[command(flatten)]
        source: SourceArgs,
        /// 映射: JSON 文件路径或内联 JSON；缺省时使用预览建议
        #[arg(long)]
        mapping: Option<String>,
        /// 跳过邮箱格式校验
        #[arg(long)]
        skip_validation: bool,
    },
    /// 保存映射方案
    SaveMapping {
        #[arg(long)]
        name: String,
        #[arg(long)]
        mapping: String,
        /// 设为组织默认方案
        #[arg(long)]
        default: bool,
    },
    /// 列出映射方案
    ListMappings,
    /// 删除映射方案
    DeleteMapping {
        #[arg(long)]
        name: String,
    },
    /// 查看导入运行
    ShowRun { run_id: String },
    /// 列出最近的导入运行
    ListRuns {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// 导出错误报告（Row,Error CSV）
    ErrorReport {
        run_id: String,
        /// 输出文件；缺省写 stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// 保存表格连接器凭据
    SetCredential {
        #[arg(long)]
        token: String,
        /// 过期时间（RFC 3339）
        #[arg(long)]
        expires_at: Option<String>,
    },
}

/// 映射参数: 以 `{` 开头视为内联 JSON，否则按文件读取
fn load_mapping(arg: &str) -> Result<RawFieldMapping> {
    let text = if arg.trim_start().starts_with('{') {
        arg.to_string()
    } else {
        std::fs::read_to_string(arg).with_context(|| format!("读取映射文件失败: {}", arg))?
    };
    serde_json::from_str(&text).context("映射 JSON 解析失败")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    lead_intake::logging::init(cli.json_logs);

    let db_path = lead_intake::db::resolve_db_path(cli.db.as_deref());
    tracing::info!(version = lead_intake::VERSION, db_path = %db_path, "lead-intake 启动");

    let api = ImportApi::open(&db_path)
        .await
        .with_context(|| format!("无法打开数据库: {}", db_path))?;

    let mut ctx = ImportContext::new(cli.org);
    if let Some(user) = cli.user {
        ctx = ctx.with_user(user);
    }

    match cli.command {
        Command::Preview { source, mapping } => {
            let mapping = mapping.as_deref().map(load_mapping).transpose()?;
            let preview = api.preview(&ctx, source.into_descriptor(), mapping).await?;
            print_json(&preview)?;
        }
        Command::Import {
            source,
            mapping,
            skip_validation,
        } => {
            let descriptor = source.into_descriptor();
            let mapping = match mapping.as_deref() {
                Some(arg) => load_mapping(arg)?,
                None => {
                    let preview = api.preview(&ctx, descriptor.clone(), None).await?;
                    tracing::info!(fields = preview.suggested_mapping.len(), "未指定映射，使用建议映射");
                    preview.suggested_mapping.to_raw()
                }
            };
            let result = api.import(&ctx, descriptor, mapping, skip_validation).await?;
            print_json(&result)?;
        }
        Command::SaveMapping {
            name,
            mapping,
            default,
        } => {
            let profile = api
                .save_mapping(&ctx, &name, load_mapping(&mapping)?, default)
                .await?;
            print_json(&profile)?;
        }
        Command::ListMappings => print_json(&api.list_mappings(&ctx).await?)?,
        Command::DeleteMapping { name } => {
            if !api.delete_mapping(&ctx, &name).await? {
                bail!("映射方案不存在: {}", name);
            }
            println!("已删除映射方案: {}", name);
        }
        Command::ShowRun { run_id } => print_json(&api.get_import_run(&ctx, &run_id).await?)?,
        Command::ListRuns { limit } => print_json(&api.list_import_runs(&ctx, limit).await?)?,
        Command::ErrorReport { run_id, out } => {
            let report = api.export_error_report(&ctx, &run_id).await?;
            match out {
                Some(path) => {
                    tokio::fs::write(&path, report.csv.as_bytes())
                        .await
                        .with_context(|| format!("写入错误报告失败: {}", path.display()))?;
                    println!("错误报告已写入: {}", path.display());
                }
                None => print!("{}", report.csv),
            }
        }
        Command::SetCredential { token, expires_at } => {
            let expires_at = expires_at
                .as_deref()
                .map(|s| DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)))
                .transpose()
                .context("expires_at 需为 RFC 3339 时间")?;
            api.set_connector_credential(&ConnectorCredential {
                org_id: ctx.org_id.clone(),
                provider: PROVIDER_GOOGLE_SHEETS.to_string(),
                access_token: token,
                expires_at,
            })?;
            println!("已保存组织 {} 的表格连接器凭据", ctx.org_id);
        }
    }

    Ok(())
}
