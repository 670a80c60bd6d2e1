//! CLI Tests

#[cfg(test)]
mod tests {
    use crate::cli::{
        Cli, CliConfig, CliError, ClassifyArgs, Commands, ContextArgs, OutputFormat, ReplyArgs,
        cmd_classify, cmd_context, cmd_render, cmd_reply, format_transcript,
    };
    use clap::Parser;
    use futures::StreamExt;
    use futures::stream;
    use smartmark_core::{
        EventStream, SmartMarkConfig, Transport, TransportError, TransportEvent, Turn,
    };
    use std::error::Error;
    use std::path::{Path, PathBuf};

    /// Replays a fixed list of events
    struct ScriptedTransport {
        events: Vec<TransportEvent>,
    }

    impl ScriptedTransport {
        fn chunks(chunks: &[&str]) -> Self {
            let mut events: Vec<TransportEvent> = chunks
                .iter()
                .map(|c| TransportEvent::Chunk(c.to_string()))
                .collect();
            events.push(TransportEvent::Done);
            Self { events }
        }
    }

    #[async_trait::async_trait]
    impl Transport for ScriptedTransport {
        async fn stream(
            &self,
            _system_prompt: &str,
            _transcript: &[Turn],
        ) -> Result<EventStream, TransportError> {
            Ok(stream::iter(self.events.clone()).boxed())
        }

        async fn complete(
            &self,
            _system_prompt: &str,
            _transcript: &[Turn],
        ) -> Result<String, TransportError> {
            let mut text = String::new();
            for event in &self.events {
                match event {
                    TransportEvent::Chunk(chunk) => text.push_str(chunk),
                    TransportEvent::Done => break,
                    TransportEvent::Error(e) => return Err(e.clone()),
                }
            }
            Ok(text)
        }
    }

    fn settings() -> SmartMarkConfig {
        let mut settings = SmartMarkConfig::default();
        settings.markers.timestamp = false;
        settings
    }

    async fn write_doc(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        tokio::fs::write(&path, text).await.unwrap();
        path
    }

    fn context_args(file: PathBuf, line: Option<isize>) -> ContextArgs {
        ContextArgs {
            file,
            line,
            depth: None,
        }
    }

    fn reply_args(file: PathBuf, no_stream: bool) -> ReplyArgs {
        ReplyArgs {
            file,
            line: None,
            model: None,
            no_stream,
        }
    }

    const DIALOGUE: &str = "Notes\n=== What is Rust?\n-----\nA language.\n= =\n=== Is it fast?";

    /// Test CliError display implementations
    #[test]
    fn test_cli_error_display() {
        let error = CliError::ConfigError("bad yaml".to_string());
        assert_eq!(format!("{}", error), "Config error: bad yaml");

        let error = CliError::ReplyFailed("network down".to_string());
        assert_eq!(format!("{}", error), "Reply failed: network down");
    }

    /// Test CliError source chain
    #[test]
    fn test_cli_error_source() {
        let error = CliError::DocumentError("inner error".to_string());
        assert!(error.source().is_none());
    }

    #[test]
    fn test_cli_error_exit_codes_are_distinct() {
        let errors = [
            CliError::ConfigError(String::new()),
            CliError::DocumentError(String::new()),
            CliError::ProviderError(String::new()),
            CliError::ReplyFailed(String::new()),
        ];
        let mut codes: Vec<u8> = errors.iter().map(CliError::exit_code).collect();
        assert!(codes.iter().all(|code| *code != 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert_eq!(CliError::ConfigError("x".to_string()).exit_code(), 78);
    }

    /// Test CliConfig default
    #[test]
    fn test_cli_config_default() {
        let config = CliConfig::default();
        assert!(config.config_path.is_none());
        assert!(!config.verbose);
        assert_eq!(config.output_format, OutputFormat::Pretty);
    }

    #[test]
    fn test_parse_context_command() {
        let cli = Cli::try_parse_from([
            "smartmark", "context", "notes.md", "--line", "-1", "--depth", "3", "--output",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.output, Some(OutputFormat::Json));
        match cli.command {
            Commands::Context(args) => {
                assert_eq!(args.file, PathBuf::from("notes.md"));
                assert_eq!(args.line, Some(-1));
                assert_eq!(args.depth, Some(3));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_reply_command_with_globals() {
        let cli = Cli::try_parse_from([
            "smartmark",
            "--verbose",
            "--config",
            "custom.yaml",
            "reply",
            "notes.md",
            "--no-stream",
            "-M",
            "gpt-4o",
        ])
        .unwrap();

        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("custom.yaml")));
        match cli.command {
            Commands::Reply(args) => {
                assert!(args.no_stream);
                assert_eq!(args.model.as_deref(), Some("gpt-4o"));
                assert_eq!(args.line, None);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_output_format() {
        let result = Cli::try_parse_from(["smartmark", "--output", "yaml", "classify", "a.md"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_format_transcript_pretty_and_json() {
        let transcript = vec![
            Turn::user("hi").unwrap(),
            Turn::assistant("hello\nthere").unwrap(),
        ];

        let pretty = format_transcript(&transcript, OutputFormat::Pretty).unwrap();
        assert_eq!(pretty, "[user]\nhi\n\n[assistant]\nhello\nthere");

        let json = format_transcript(&transcript, OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["role"], "user");
        assert_eq!(value[1]["content"], "hello\nthere");
    }

    #[tokio::test]
    async fn test_context_command_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_doc(dir.path(), "chat.md", DIALOGUE).await;

        let output = cmd_context(
            context_args(path, None),
            &settings(),
            &CliConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(
            output,
            "[user]\nWhat is Rust?\n\n[assistant]\nA language.\n\n[user]\nIs it fast?"
        );
    }

    #[tokio::test]
    async fn test_context_command_respects_depth() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_doc(dir.path(), "chat.md", DIALOGUE).await;

        let mut args = context_args(path, Some(-1));
        args.depth = Some(1);
        let config = CliConfig {
            output_format: OutputFormat::Json,
            ..CliConfig::default()
        };
        let output = cmd_context(args, &settings(), &config).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        let turns = value.as_array().unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1]["content"], "Is it fast?");
    }

    #[tokio::test]
    async fn test_context_command_missing_file() {
        let err = cmd_context(
            context_args(PathBuf::from("/no/such/chat.md"), None),
            &settings(),
            &CliConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CliError::DocumentError(_)));
    }

    #[tokio::test]
    async fn test_classify_command_lists_every_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_doc(dir.path(), "chat.md", "=== hi\n-----\nhello\n= =\n=-=").await;

        let output = cmd_classify(ClassifyArgs { file: path }, &settings())
            .await
            .unwrap();
        let kinds: Vec<&str> = output
            .lines()
            .map(|line| line.split_whitespace().nth(1).unwrap())
            .collect();
        assert_eq!(
            kinds,
            vec![
                "user-inline",
                "separator",
                "plain",
                "assistant-boundary",
                "terminate"
            ]
        );
    }

    #[tokio::test]
    async fn test_render_command_normalizes_markers() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_doc(
            dir.path(),
            "chat.md",
            "===\nfirst\nsecond\n===\n= = short answer\n===follow up===",
        )
        .await;

        let output = cmd_render(context_args(path, None), &settings())
            .await
            .unwrap();
        assert_eq!(
            output,
            "===\nfirst\nsecond\n===\n-----\nshort answer\n= =\n=== follow up"
        );
    }

    #[tokio::test]
    async fn test_render_command_keeps_marker_like_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_doc(dir.path(), "chat.md", "===\na ===\n===\n= = xxxx").await;

        let output = cmd_render(context_args(path, None), &settings())
            .await
            .unwrap();
        assert_eq!(output, "===\na ===\n===\n= = xxxx");
    }

    #[tokio::test]
    async fn test_reply_command_streams_into_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_doc(dir.path(), "chat.md", "=== Say hello").await;
        let transport = ScriptedTransport::chunks(&["Hello", " world"]);

        let output = cmd_reply(reply_args(path.clone(), false), &settings(), &transport)
            .await
            .unwrap();
        assert_eq!(output, "reply written (2 chunks, 15 bytes)");

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(text, "=== Say hello\n-----\nHello world\n= =");
    }

    #[tokio::test]
    async fn test_reply_command_without_streaming() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_doc(dir.path(), "chat.md", "=== Say hello").await;
        let transport = ScriptedTransport::chunks(&["Hi", "!"]);

        let output = cmd_reply(reply_args(path.clone(), true), &settings(), &transport)
            .await
            .unwrap();
        assert_eq!(output, "reply written (1 chunks, 7 bytes)");

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(text, "=== Say hello\n-----\nHi!\n= =");
    }

    #[tokio::test]
    async fn test_reply_command_failure_keeps_partial_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_doc(dir.path(), "chat.md", "=== Say hello").await;
        let transport = ScriptedTransport {
            events: vec![
                TransportEvent::Chunk("Hel".to_string()),
                TransportEvent::Error(TransportError::Failed("timeout".to_string())),
            ],
        };

        let err = cmd_reply(reply_args(path.clone(), false), &settings(), &transport)
            .await
            .unwrap_err();
        assert_eq!(err, CliError::ReplyFailed("timeout".to_string()));

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(text, "=== Say hello\n-----\nHel\n[interrupted]\n= =");
    }

    #[tokio::test]
    async fn test_reply_command_requires_dialogue() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_doc(dir.path(), "notes.md", "just some notes").await;
        let transport = ScriptedTransport::chunks(&["unused"]);

        let err = cmd_reply(reply_args(path.clone(), false), &settings(), &transport)
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::DocumentError(_)));

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(text, "just some notes");
    }
}
