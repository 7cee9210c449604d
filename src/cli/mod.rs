//! 命令行交互组件
//!
//! - 补全与语法高亮 (rustyline)
//! - 控制台命令 (:bind、:ir、:tee ...)
//! - 结果打印 (prettytable / JSON)

pub mod commands;
pub mod completer;
pub mod printer;

pub use commands::{execute_console_command, is_console_command, CommandResult, ConsoleState};
pub use completer::AqlHelper;
pub use printer::{OutputFormat, Printer};
