//! aqlbridge 命令行工具
//!
//! 单条翻译 (-e)、批量翻译 (-f) 与交互式 REPL

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use aqlbridge::cli::{
    execute_console_command, is_console_command, AqlHelper, CommandResult, ConsoleState,
    OutputFormat,
};
use aqlbridge::{BindVars, Translator, TranslatorConfig};
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::Editor;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "aqlbridge")]
#[command(about = "AQL → ArcadeDB SQL 翻译器", version)]
struct Args {
    /// 翻译单个查询后退出
    #[arg(short = 'e', long)]
    execute: Option<String>,

    /// 批量翻译文件中的查询，查询之间以空行分隔
    #[arg(short = 'f', long, conflicts_with = "execute")]
    file: Option<PathBuf>,

    /// 绑定变量 (JSON 对象，`@name` 表示集合参数)
    #[arg(long)]
    bind: Option<String>,

    /// 从 JSON 文件读取绑定变量
    #[arg(long, conflicts_with = "bind")]
    bind_file: Option<PathBuf>,

    /// 翻译器配置文件 (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 输出格式
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// 同时打印降级后的 IR 流水线
    #[arg(long)]
    ir: bool,

    /// 输出调试日志
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = match &args.config {
        Some(path) => TranslatorConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => TranslatorConfig::default(),
    };
    let bind_vars = load_bind_vars(&args)?;
    let translator = Translator::new(config);
    let mut state = ConsoleState::new(bind_vars, args.format, args.ir);

    // 单个查询模式
    if let Some(query) = &args.execute {
        let ok = translate_one(&translator, &mut state, query);
        if !ok {
            std::process::exit(1);
        }
        return Ok(());
    }

    // 批量模式
    if let Some(path) = &args.file {
        let failures = translate_file(&translator, &mut state, path)?;
        if failures > 0 {
            bail!("{} queries failed to translate", failures);
        }
        return Ok(());
    }

    run_repl(&translator, &mut state)
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("aqlbridge=debug")
    } else {
        EnvFilter::try_from_env("AQLBRIDGE_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("aqlbridge=warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_bind_vars(args: &Args) -> Result<BindVars> {
    if let Some(text) = &args.bind {
        return BindVars::parse_str(text).context("parsing --bind");
    }
    if let Some(path) = &args.bind_file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        return BindVars::parse_str(&text).with_context(|| format!("parsing {}", path.display()));
    }
    Ok(BindVars::new())
}

/// Translate and print one query; false on failure
fn translate_one(translator: &Translator, state: &mut ConsoleState, query: &str) -> bool {
    let printer = state.printer();

    if state.show_ir {
        match translator.explain(query) {
            Ok(pipeline) => state.write_output(&printer.print_pipeline(&pipeline)),
            Err(e) => {
                eprint!("{}", printer.print_error(&e, query));
                return false;
            }
        }
    }

    match translator.translate(query, &state.bind_vars) {
        Ok(translation) => {
            state.write_output(&printer.print_translation(&translation));
            true
        }
        Err(e) => {
            eprint!("{}", printer.print_error(&e, query));
            false
        }
    }
}

/// Queries in a batch file are separated by blank lines
fn split_queries(text: &str) -> Vec<String> {
    let mut queries = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.trim().is_empty() {
                queries.push(current.trim().to_string());
            }
            current.clear();
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    if !current.trim().is_empty() {
        queries.push(current.trim().to_string());
    }
    queries
}

fn translate_file(translator: &Translator, state: &mut ConsoleState, path: &Path) -> Result<usize> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let queries: Vec<(String, BindVars)> = split_queries(&text)
        .into_iter()
        .map(|q| (q, state.bind_vars.clone()))
        .collect();
    debug!(count = queries.len(), "batch translation");

    let printer = state.printer();
    let results = translator.translate_all(&queries);
    let mut failures = 0;
    for ((query, _), result) in queries.iter().zip(results) {
        match result {
            Ok(translation) => state.write_output(&printer.print_translation(&translation)),
            Err(e) => {
                failures += 1;
                eprint!("{}", printer.print_error(&e, query));
            }
        }
        if state.format == OutputFormat::Text {
            state.write_output("\n");
        }
    }
    Ok(failures)
}

fn history_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("aqlbridge").join("history.txt"))
}

fn run_repl(translator: &Translator, state: &mut ConsoleState) -> Result<()> {
    println!("aqlbridge {} - AQL → ArcadeDB SQL", aqlbridge::VERSION);
    println!("输入 :help 查看命令列表，:quit 退出\n");

    let mut rl: Editor<AqlHelper, DefaultHistory> = Editor::new()?;
    rl.set_helper(Some(AqlHelper::new()));

    let history = history_path();
    if let Some(path) = &history {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = rl.load_history(path);
    }

    let mut buffer = String::new();
    loop {
        let prompt = if buffer.is_empty() { "aql> " } else { "  -> " };
        let line = match rl.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                buffer.clear();
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };

        // 行尾 \ 续行
        if let Some(partial) = line.strip_suffix('\\') {
            buffer.push_str(partial);
            buffer.push('\n');
            continue;
        }
        buffer.push_str(&line);
        let input = std::mem::take(&mut buffer);
        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(input);

        if is_console_command(input) {
            match execute_console_command(input, state) {
                CommandResult::Exit => break,
                CommandResult::Continue => {}
                CommandResult::Message(msg) => state.write_output(&format!("{}\n", msg)),
                CommandResult::Error(msg) => eprintln!("{}", msg),
            }
            continue;
        }

        translate_one(translator, state, input);
    }

    if let Some(path) = &history {
        let _ = rl.save_history(path);
    }
    println!("再见！");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_queries() {
        let text = "FOR u IN users\nRETURN u\n\n\nFOR o IN orders RETURN o\n";
        let queries = split_queries(text);
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0], "FOR u IN users\nRETURN u");
    }
}
