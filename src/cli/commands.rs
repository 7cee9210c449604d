//! 控制台命令处理
//!
//! 处理以 : 开头的控制台命令

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use serde_json::Value;

use crate::bind::BindVars;
use crate::cli::printer::{OutputFormat, Printer};
use crate::metrics::global_metrics;

/// 控制台命令执行结果
#[derive(Debug, PartialEq)]
pub enum CommandResult {
    /// 继续运行
    Continue,
    /// 退出程序
    Exit,
    /// 显示消息
    Message(String),
    /// 错误
    Error(String),
}

/// 控制台状态
#[derive(Default)]
pub struct ConsoleState {
    /// 输出到文件
    pub tee_file: Option<File>,
    /// 当前会话的绑定变量
    pub bind_vars: BindVars,
    /// 翻译前先打印 IR 流水线
    pub show_ir: bool,
    pub format: OutputFormat,
}

impl ConsoleState {
    pub fn new(bind_vars: BindVars, format: OutputFormat, show_ir: bool) -> Self {
        Self {
            tee_file: None,
            bind_vars,
            show_ir,
            format,
        }
    }

    /// 写入输出（同时写入 stdout 和 tee 文件）
    pub fn write_output(&mut self, content: &str) {
        print!("{}", content);
        if let Some(ref mut file) = self.tee_file {
            let _ = file.write_all(content.as_bytes());
        }
    }

    pub fn printer(&self) -> Printer {
        Printer::new(self.format)
    }
}

/// 解析并执行控制台命令
pub fn execute_console_command(input: &str, state: &mut ConsoleState) -> CommandResult {
    let input = input.trim();
    let cmd_line = input.strip_prefix(':').unwrap_or(input);

    let parts: Vec<&str> = cmd_line.splitn(2, ' ').collect();
    let cmd = parts[0].to_lowercase();
    let args = parts.get(1).copied().unwrap_or("").trim();

    match cmd.as_str() {
        "help" | "h" => CommandResult::Message(Printer::help()),

        "quit" | "q" | "exit" => CommandResult::Exit,

        "bind" => {
            let (name, value) = match args.split_once(char::is_whitespace) {
                Some((name, value)) => (name, value.trim()),
                None => return CommandResult::Error("Usage: :bind <name|@coll> <json>".to_string()),
            };
            // 非 JSON 的值按字符串处理，方便 `:bind @coll users`
            let value: Value = serde_json::from_str(value)
                .unwrap_or_else(|_| Value::String(value.to_string()));
            state.bind_vars.set(name, value);
            CommandResult::Message(format!("Bound {}", name))
        }

        "unbind" => {
            if args.is_empty() {
                CommandResult::Error("Usage: :unbind <name|@coll>".to_string())
            } else if state.bind_vars.remove(args) {
                CommandResult::Message(format!("Unbound {}", args))
            } else {
                CommandResult::Error(format!("No bind variable named {}", args))
            }
        }

        "binds" => CommandResult::Message(state.printer().print_bind_vars(&state.bind_vars)),

        "ir" => match toggle(args, state.show_ir) {
            Some(on) => {
                state.show_ir = on;
                CommandResult::Message(format!("IR display {}", if on { "on" } else { "off" }))
            }
            None => CommandResult::Error("Usage: :ir [on|off]".to_string()),
        },

        "json" => match toggle(args, state.format == OutputFormat::Json) {
            Some(on) => {
                state.format = if on { OutputFormat::Json } else { OutputFormat::Text };
                CommandResult::Message(format!("JSON output {}", if on { "on" } else { "off" }))
            }
            None => CommandResult::Error("Usage: :json [on|off]".to_string()),
        },

        "stats" => {
            CommandResult::Message(state.printer().print_stats(&global_metrics().snapshot()))
        }

        "tee" => {
            let args_parts: Vec<&str> = args.split_whitespace().collect();
            let (overwrite, filename) = if args_parts.first() == Some(&"-o") {
                (true, args_parts.get(1).copied())
            } else {
                (false, args_parts.first().copied())
            };

            if let Some(filename) = filename {
                let path = PathBuf::from(filename);
                let file = if overwrite {
                    File::create(&path)
                } else {
                    File::options().create(true).append(true).open(&path)
                };

                match file {
                    Ok(f) => {
                        state.tee_file = Some(f);
                        CommandResult::Message(format!("Logging to {}", filename))
                    }
                    Err(e) => CommandResult::Error(format!("Cannot open file: {}", e)),
                }
            } else {
                CommandResult::Error("Usage: :tee [-o] <filename>".to_string())
            }
        }

        "notee" => {
            if state.tee_file.take().is_some() {
                CommandResult::Message("Stopped logging".to_string())
            } else {
                CommandResult::Message("No active logging".to_string())
            }
        }

        "clear" => {
            print!("\x1B[2J\x1B[1;1H");
            CommandResult::Continue
        }

        _ => CommandResult::Error(format!("Unknown command: {}. Type :help for help.", cmd)),
    }
}

/// `on` / `off`, or flip the current value when no argument is given
fn toggle(args: &str, current: bool) -> Option<bool> {
    match args.to_lowercase().as_str() {
        "" => Some(!current),
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
    }
}

/// 检查输入是否是控制台命令
pub fn is_console_command(input: &str) -> bool {
    input.trim().starts_with(':')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bind_and_unbind() {
        let mut state = ConsoleState::default();
        assert!(matches!(
            execute_console_command(":bind min 18", &mut state),
            CommandResult::Message(_)
        ));
        assert!(matches!(
            execute_console_command(":bind @coll users", &mut state),
            CommandResult::Message(_)
        ));
        assert_eq!(state.bind_vars.value("min"), Some(&json!(18)));
        assert_eq!(state.bind_vars.collection("coll"), Some(&json!("users")));

        assert!(matches!(
            execute_console_command(":unbind min", &mut state),
            CommandResult::Message(_)
        ));
        assert!(matches!(
            execute_console_command(":unbind min", &mut state),
            CommandResult::Error(_)
        ));
        assert!(matches!(
            execute_console_command(":bind lonely", &mut state),
            CommandResult::Error(_)
        ));
    }

    #[test]
    fn test_toggles() {
        let mut state = ConsoleState::default();
        execute_console_command(":ir", &mut state);
        assert!(state.show_ir);
        execute_console_command(":ir off", &mut state);
        assert!(!state.show_ir);
        execute_console_command(":json on", &mut state);
        assert_eq!(state.format, OutputFormat::Json);
        assert!(matches!(
            execute_console_command(":json maybe", &mut state),
            CommandResult::Error(_)
        ));
    }

    #[test]
    fn test_tee_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let mut state = ConsoleState::default();
        let cmd = format!(":tee -o {}", path.display());
        assert!(matches!(
            execute_console_command(&cmd, &mut state),
            CommandResult::Message(_)
        ));
        state.write_output("SELECT 1\n");
        execute_console_command(":notee", &mut state);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "SELECT 1\n");
    }

    #[test]
    fn test_exit_and_unknown() {
        let mut state = ConsoleState::default();
        assert_eq!(execute_console_command(":q", &mut state), CommandResult::Exit);
        assert!(matches!(
            execute_console_command(":frobnicate", &mut state),
            CommandResult::Error(_)
        ));
        assert!(is_console_command("  :help"));
        assert!(!is_console_command("FOR u IN users RETURN u"));
    }
}
