//! Agent 集成测试（脚本化的假 Controller）

#[cfg(feature = "follower")]
mod common;

#[cfg(feature = "follower")]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use panama::{codec, AgentSession, Error, FollowerConfig, Request, Response};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;

    use super::common::MockAudit;

    /// 假 Controller 持有的两条连接
    struct FakeController {
        control_reader: BufReader<OwnedReadHalf>,
        control_writer: OwnedWriteHalf,
        broadcast: TcpStream,
    }

    impl FakeController {
        async fn recv_request(&mut self) -> Request {
            let mut line = String::new();
            timeout(Duration::from_secs(5), self.control_reader.read_line(&mut line))
                .await
                .expect("agent sent nothing")
                .unwrap();
            serde_json::from_str(&line).unwrap()
        }

        async fn reply(&mut self, response: &Response) {
            let json = serde_json::to_string(response).unwrap();
            self.control_writer
                .write_all(format!("{}\n", json).as_bytes())
                .await
                .unwrap();
        }

        async fn send_token(&mut self, token: &str) {
            self.broadcast
                .write_all(format!("{}\n", token).as_bytes())
                .await
                .unwrap();
        }

        /// 控制通道在给定时间内没有新数据
        async fn assert_control_quiet(&mut self, wait: Duration) {
            let mut line = String::new();
            let read = timeout(wait, self.control_reader.read_line(&mut line)).await;
            assert!(read.is_err(), "unexpected control traffic: {:?}", line);
        }
    }

    /// 启动假 Controller 并让 Agent 注册为 `id`
    async fn register_agent(
        id: &str,
        audit: Arc<MockAudit>,
    ) -> (AgentSession, FakeController) {
        let control = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let broadcast = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let control_addr = control.local_addr().unwrap();
        let broadcast_port = broadcast.local_addr().unwrap().port();
        let id = id.to_string();

        let fake = tokio::spawn(async move {
            let (stream, _) = control.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut reader = BufReader::new(reader);

            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let request: Request = serde_json::from_str(&line).unwrap();
            assert_eq!(request, Request::Register {});

            // 返回未指定地址，Agent 应替换为 Controller 主机
            let response = Response::Registered {
                id: id.as_str().into(),
                broadcast_endpoint: format!("0.0.0.0:{}", broadcast_port),
            };
            let json = serde_json::to_string(&response).unwrap();
            writer.write_all(format!("{}\n", json).as_bytes()).await.unwrap();

            let (broadcast, _) = broadcast.accept().await.unwrap();
            FakeController {
                control_reader: reader,
                control_writer: writer,
                broadcast,
            }
        });

        let config = FollowerConfig::new(&control_addr.to_string());
        let session = AgentSession::register(config, audit).await.unwrap();
        let fake = fake.await.unwrap();
        (session, fake)
    }

    #[tokio::test]
    async fn test_register_stores_identity() {
        let audit = Arc::new(MockAudit::without_log());
        let (session, _fake) = register_agent("7", audit.clone()).await;

        assert_eq!(session.id().as_str(), "7");
        assert!(!session.is_auditing());
        assert!(audit.calls().is_empty());
    }

    #[tokio::test]
    async fn test_start_stop_shutdown_sequence() {
        let audit = Arc::new(MockAudit::with_log("hello"));
        let (mut session, mut fake) = register_agent("0", audit.clone()).await;
        let agent = tokio::spawn(async move {
            let result = session.reaction_loop().await;
            (result, session)
        });

        fake.send_token("START").await;
        assert_eq!(
            fake.recv_request().await,
            Request::AuditReport {
                id: "0".into(),
                auditing: true,
                log_payload: None,
            }
        );
        fake.reply(&Response::Ack).await;

        fake.send_token("STOP").await;
        match fake.recv_request().await {
            Request::AuditReport {
                id,
                auditing,
                log_payload,
            } => {
                assert_eq!(id.as_str(), "0");
                assert!(!auditing);
                assert_eq!(codec::decode(&log_payload.unwrap()).unwrap(), "hello");
            }
            other => panic!("Expected AuditReport, got {:?}", other),
        }
        fake.reply(&Response::Ack).await;

        fake.send_token("SHUTDOWN").await;
        let (result, session) = timeout(Duration::from_secs(5), agent).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert!(!session.is_auditing());
        assert_eq!(audit.calls(), vec!["enable", "disable", "fetch_log"]);

        // Shutdown 之后不再有控制通道流量
        fake.assert_control_quiet(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn test_stop_without_log_sends_no_payload() {
        let audit = Arc::new(MockAudit::without_log());
        let (mut session, mut fake) = register_agent("1", audit.clone()).await;
        let agent = tokio::spawn(async move { session.reaction_loop().await });

        fake.send_token("STOP").await;
        assert_eq!(
            fake.recv_request().await,
            Request::AuditReport {
                id: "1".into(),
                auditing: false,
                log_payload: None,
            }
        );
        fake.reply(&Response::Ack).await;

        fake.send_token("SHUTDOWN").await;
        assert!(agent.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_no_second_report_before_ack() {
        let audit = Arc::new(MockAudit::with_log("log"));
        let (mut session, mut fake) = register_agent("0", audit.clone()).await;
        let agent = tokio::spawn(async move { session.reaction_loop().await });

        // 两个令牌连续到达
        fake.send_token("START").await;
        fake.send_token("STOP").await;

        let first = fake.recv_request().await;
        assert!(matches!(first, Request::AuditReport { auditing: true, .. }));

        // Ack 之前 Agent 不会处理 STOP
        fake.assert_control_quiet(Duration::from_millis(300)).await;
        assert_eq!(audit.calls(), vec!["enable"]);

        fake.reply(&Response::Ack).await;
        let second = fake.recv_request().await;
        assert!(matches!(second, Request::AuditReport { auditing: false, .. }));
        fake.reply(&Response::Ack).await;

        fake.send_token("SHUTDOWN").await;
        assert!(agent.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_repeated_start_reenables() {
        let audit = Arc::new(MockAudit::without_log());
        let (mut session, mut fake) = register_agent("0", audit.clone()).await;
        let agent = tokio::spawn(async move { session.reaction_loop().await });

        for _ in 0..2 {
            fake.send_token("START").await;
            assert!(matches!(
                fake.recv_request().await,
                Request::AuditReport { auditing: true, .. }
            ));
            fake.reply(&Response::Ack).await;
        }

        fake.send_token("SHUTDOWN").await;
        assert!(agent.await.unwrap().is_ok());
        assert_eq!(audit.calls(), vec!["enable", "enable"]);
    }

    #[tokio::test]
    async fn test_unknown_token_ignored() {
        let audit = Arc::new(MockAudit::without_log());
        let (mut session, mut fake) = register_agent("0", audit.clone()).await;
        let agent = tokio::spawn(async move {
            let result = session.reaction_loop().await;
            (result, session)
        });

        fake.send_token("END").await;
        fake.send_token("SHUTDOWN").await;

        // 保留 session，控制连接保持打开
        let (result, _session) = agent.await.unwrap();
        assert!(result.is_ok());
        assert!(audit.calls().is_empty());
        fake.assert_control_quiet(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn test_broadcast_closed_is_error() {
        let audit = Arc::new(MockAudit::without_log());
        let (mut session, fake) = register_agent("0", audit).await;

        drop(fake);
        let result = session.reaction_loop().await;
        assert!(matches!(result, Err(Error::Connection(_))));
    }

    #[tokio::test]
    async fn test_rejected_report_is_error() {
        let audit = Arc::new(MockAudit::without_log());
        let (mut session, mut fake) = register_agent("0", audit).await;
        let agent = tokio::spawn(async move { session.reaction_loop().await });

        fake.send_token("START").await;
        fake.recv_request().await;
        fake.reply(&Response::Error {
            code: 400,
            message: "bad".to_string(),
        })
        .await;

        let result = agent.await.unwrap();
        assert!(matches!(result, Err(Error::Rejected { code: 400, .. })));
    }

    #[tokio::test]
    async fn test_unreachable_controller() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let audit = Arc::new(MockAudit::without_log());
        let result = AgentSession::register(FollowerConfig::new(&addr.to_string()), audit).await;
        assert!(matches!(result, Err(Error::Connection(_))));
    }

    #[tokio::test]
    async fn test_register_request_timeout() {
        // 只接受连接，从不应答
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let silent = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(stream);
        });

        let config = FollowerConfig::new(&addr.to_string())
            .with_request_timeout(Duration::from_millis(200));
        let audit = Arc::new(MockAudit::without_log());
        let result = AgentSession::register(config, audit).await;

        assert!(matches!(result, Err(Error::Timeout(_))));
        silent.abort();
    }

    #[test]
    fn test_follower_config_defaults() {
        let config = FollowerConfig::default();
        assert_eq!(config.controller_addr, "localhost:5556");
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(10)));
        assert!(config.request_timeout.is_none());
    }
}
