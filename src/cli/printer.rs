//! 结果打印器
//!
//! 提供 SQL 文本与参数表格、JSON 两种输出格式

use prettytable::{format, row, Cell, Row, Table};
use serde::Serialize;

use crate::bind::BindVars;
use crate::error::Error;
use crate::ir::Pipeline;
use crate::metrics::MetricsSnapshot;
use crate::translator::Translation;

/// 输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// SQL 文本 + 参数表格
    #[default]
    Text,
    /// 序列化的 `Translation`
    Json,
}

/// 结果打印器
pub struct Printer {
    format: OutputFormat,
}

impl Default for Printer {
    fn default() -> Self {
        Self::new(OutputFormat::Text)
    }
}

impl Printer {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn set_format(&mut self, format: OutputFormat) {
        self.format = format;
    }

    /// 打印翻译结果
    pub fn print_translation(&self, translation: &Translation) -> String {
        match self.format {
            OutputFormat::Json => to_json(translation),
            OutputFormat::Text => {
                let mut output = format!("{}\n", translation.sql);
                if !translation.parameters.is_empty() {
                    let rows: Vec<Vec<String>> = translation
                        .parameters
                        .iter()
                        .map(|(name, value)| vec![name.clone(), value.to_string()])
                        .collect();
                    output.push_str(&format_table(&["Parameter", "Value"], &rows));
                }
                if !translation.deferred.is_empty() {
                    output.push_str(&format!("deferred: {}\n", translation.deferred.join(", ")));
                }
                output
            }
        }
    }

    /// 打印错误诊断，文本格式带源码定位
    pub fn print_error(&self, error: &Error, source: &str) -> String {
        let diagnostic = error.diagnostic();
        match self.format {
            OutputFormat::Json => to_json(&diagnostic),
            OutputFormat::Text => {
                let mut rendered = diagnostic.render(source);
                if !rendered.ends_with('\n') {
                    rendered.push('\n');
                }
                rendered
            }
        }
    }

    /// 打印 IR 流水线，每个阶段一行
    pub fn print_pipeline(&self, pipeline: &Pipeline) -> String {
        match self.format {
            OutputFormat::Json => to_json(pipeline),
            OutputFormat::Text => {
                let mut output = String::new();
                for (i, stage) in pipeline.stages.iter().enumerate() {
                    output.push_str(&format!("{:>3}  {}\n", i + 1, stage));
                }
                output
            }
        }
    }

    pub fn print_bind_vars(&self, vars: &BindVars) -> String {
        if vars.is_empty() {
            return "No bind variables\n".to_string();
        }
        match self.format {
            OutputFormat::Json => to_json(vars),
            OutputFormat::Text => {
                let rows: Vec<Vec<String>> = vars
                    .iter()
                    .map(|(name, value)| vec![name, value.to_string()])
                    .collect();
                format_table(&["Name", "Value"], &rows)
            }
        }
    }

    /// 打印统计信息
    pub fn print_stats(&self, snapshot: &MetricsSnapshot) -> String {
        if self.format == OutputFormat::Json {
            return to_json(snapshot);
        }
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_BOX_CHARS);
        table.set_titles(row!["Metric", "Value"]);
        table.add_row(row!["Translations", snapshot.total_translations.to_string()]);
        table.add_row(row!["Succeeded", snapshot.success_translations.to_string()]);
        table.add_row(row!["Failed", snapshot.failed_translations.to_string()]);
        for (stage, count) in &snapshot.stage_failures {
            table.add_row(row![format!("  {} failures", stage), count.to_string()]);
        }
        table.add_row(row![
            "Avg duration",
            format!("{:.1} us", snapshot.avg_duration_us)
        ]);
        table.add_row(row!["SQL bytes", snapshot.output_bytes.to_string()]);
        table.to_string()
    }

    /// 打印帮助信息
    pub fn help() -> String {
        r#"
═══════════════════════════════════════════════════════════════
                   aqlbridge 命令帮助
═══════════════════════════════════════════════════════════════

输入 AQL 查询即翻译为 ArcadeDB SQL。行尾的 \ 表示续行。

示例:
  FOR u IN users FILTER u.active == true RETURN u.name
  FOR u IN users COLLECT dept = u.department WITH COUNT INTO cnt RETURN {dept, cnt}
  FOR v IN 1..3 OUTBOUND 'accounts/1' transfers RETURN v
  FOR u IN @@coll FILTER u.age >= @min RETURN u

控制台命令 (以 : 开头):
  :help, :h                显示帮助
  :quit, :q, :exit         退出程序
  :bind <name> <json>      设置绑定变量 (@name 表示集合参数)
  :unbind <name>           删除绑定变量
  :binds                   列出绑定变量
  :ir [on|off]             显示降级后的 IR 流水线
  :json [on|off]           以 JSON 输出结果
  :stats                   显示翻译统计
  :tee [-o] <file>         输出到文件 (-o 覆盖)
  :notee                   停止输出到文件
  :clear                   清屏

═══════════════════════════════════════════════════════════════
"#
        .to_string()
    }
}

/// 表格格式
fn format_table(columns: &[&str], rows: &[Vec<String>]) -> String {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BOX_CHARS);

    let header: Vec<Cell> = columns.iter().map(|c| Cell::new(c)).collect();
    table.set_titles(Row::new(header));

    for row_data in rows {
        let cells: Vec<Cell> = row_data.iter().map(|v| Cell::new(v)).collect();
        table.add_row(Row::new(cells));
    }

    table.to_string()
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    match serde_json::to_string_pretty(value) {
        Ok(mut text) => {
            text.push('\n');
            text
        }
        Err(e) => format!("{{\"error\": \"{}\"}}\n", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::StatementKind;
    use indexmap::IndexMap;
    use serde_json::json;

    fn translation() -> Translation {
        let mut parameters = IndexMap::new();
        parameters.insert("min".to_string(), json!(18));
        Translation {
            sql: "SELECT * FROM users WHERE age >= :min".to_string(),
            parameters,
            deferred: vec![],
            kind: StatementKind::Select,
        }
    }

    #[test]
    fn test_text_translation() {
        let output = Printer::default().print_translation(&translation());
        assert!(output.starts_with("SELECT * FROM users WHERE age >= :min\n"));
        assert!(output.contains("Parameter"));
        assert!(output.contains("18"));
    }

    #[test]
    fn test_json_translation() {
        let output = Printer::new(OutputFormat::Json).print_translation(&translation());
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["kind"], json!("select"));
        assert_eq!(value["parameters"]["min"], json!(18));
    }

    #[test]
    fn test_bind_vars_table() {
        let printer = Printer::default();
        assert_eq!(printer.print_bind_vars(&BindVars::new()), "No bind variables\n");
        let vars = BindVars::new().with_collection("coll", "users");
        assert!(printer.print_bind_vars(&vars).contains("@coll"));
    }

    #[test]
    fn test_error_rendering() {
        let source = "FOR u IN users RETURN";
        let err = crate::translator::Translator::default()
            .translate(source, &BindVars::new())
            .unwrap_err();
        let text = Printer::default().print_error(&err, source);
        assert!(text.contains("parse"));

        let value: serde_json::Value =
            serde_json::from_str(&Printer::new(OutputFormat::Json).print_error(&err, source))
                .unwrap();
        assert_eq!(value["stage"], json!("parse"));
    }
}
