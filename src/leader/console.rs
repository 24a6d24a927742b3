//! 操作台
//!
//! 把操作员输入翻译成广播令牌或注册表查询。

use std::future::Future;
use std::io::BufRead;
use std::ops::ControlFlow;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tokio::sync::mpsc;

use super::server::Controller;
use crate::error::Result;
use crate::protocol::Token;

/// 提示符
pub const PROMPT: &str = "> ";

const HELP: &str = "\
commands:
  s, start    start auditing on every agent
  e, stop     stop auditing and collect logs
  d, status   show registered agents
  q, quit     shut down every agent and exit
  h, help     show this message
";

/// 操作员命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Quit,
    Status,
    Help,
    /// 空行
    Empty,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "" => Command::Empty,
            "start" | "s" => Command::Start,
            "stop" | "end" | "e" => Command::Stop,
            "quit" | "q" => Command::Quit,
            "status" | "debug" | "d" => Command::Status,
            "help" | "h" => Command::Help,
            other => Command::Unknown(other.to_string()),
        }
    }
}

/// 执行一条命令
pub async fn execute<W>(controller: &Controller, command: Command, out: &mut W) -> Result<ControlFlow<()>>
where
    W: AsyncWrite + Unpin,
{
    match command {
        Command::Start => {
            let count = controller.broadcast(Token::Start);
            out.write_all(format!("start sent to {} agent(s)\n", count).as_bytes())
                .await?;
        }
        Command::Stop => {
            let count = controller.broadcast(Token::Stop);
            out.write_all(format!("stop sent to {} agent(s)\n", count).as_bytes())
                .await?;
        }
        Command::Quit => {
            controller.shutdown().await;
            out.write_all(b"bye\n").await?;
            out.flush().await?;
            return Ok(ControlFlow::Break(()));
        }
        Command::Status => {
            let entries = controller.registry().snapshot();
            if entries.is_empty() {
                out.write_all(b"no agents registered\n").await?;
            }
            for entry in entries {
                let state = if entry.auditing { "auditing" } else { "idle" };
                out.write_all(format!("{:>6}  {}\n", entry.id, state).as_bytes())
                    .await?;
            }
        }
        Command::Help => {
            out.write_all(HELP.as_bytes()).await?;
        }
        Command::Empty => {}
        Command::Unknown(input) => {
            out.write_all(format!("unknown command: {} (type help)\n", input).as_bytes())
                .await?;
        }
    }
    out.flush().await?;
    Ok(ControlFlow::Continue(()))
}

/// 操作员输入，按行读取
pub trait LineSource {
    /// 下一行输入，`None` 表示输入结束
    fn next_line(&mut self) -> impl Future<Output = Result<Option<String>>>;
}

impl<R: AsyncBufRead + Unpin> LineSource for Lines<R> {
    async fn next_line(&mut self) -> Result<Option<String>> {
        Ok(Lines::next_line(self).await?)
    }
}

impl LineSource for mpsc::Receiver<String> {
    async fn next_line(&mut self) -> Result<Option<String>> {
        Ok(self.recv().await)
    }
}

/// 在独立线程上读取标准输入
///
/// `tokio::io::stdin()` 的阻塞读取无法取消，运行时退出时会一直等到下一次回车。
/// 这个线程不属于运行时，进程退出时直接丢弃；输入结束时通道关闭。
pub fn stdin_lines() -> Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::Builder::new()
        .name("panama-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("读取标准输入失败: {}", e);
                        break;
                    }
                }
            }
        })?;
    Ok(rx)
}

/// 交互循环，输入结束等同于 quit
pub async fn run<R, W>(controller: &Controller, input: R, out: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    run_lines(controller, input.lines(), out).await
}

/// 交互循环，从任意行输入源读取命令
pub async fn run_lines<S, W>(controller: &Controller, mut input: S, mut out: W) -> Result<()>
where
    S: LineSource,
    W: AsyncWrite + Unpin,
{
    out.write_all(b"Type help for options\n").await?;

    loop {
        out.write_all(PROMPT.as_bytes()).await?;
        out.flush().await?;

        let command = match input.next_line().await? {
            Some(line) => Command::parse(&line),
            None => Command::Quit,
        };
        tracing::debug!("⌨️ command: {:?}", command);

        if execute(controller, command, &mut out).await?.is_break() {
            return Ok(());
        }
    }
}
