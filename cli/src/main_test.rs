use super::*;

#[test]
fn move_parses_optional_groups() {
    let cli = Cli::try_parse_from([
        "chat-cli",
        "--token",
        "t",
        "conversations",
        "move",
        "c1",
        "--from",
        "p1",
    ])
    .expect("parse");

    assert_eq!(cli.token.as_deref(), Some("t"));
    match cli.command {
        Command::Conversations(ConversationsCommand {
            command: ConversationsSubcommand::Move { conversation_id, from, to },
        }) => {
            assert_eq!(conversation_id, "c1");
            assert_eq!(from.as_deref(), Some("p1"));
            assert_eq!(to, None);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn retag_splits_on_commas() {
    let cli = Cli::try_parse_from(["chat-cli", "conversations", "retag", "c1", "--tags", "work,urgent"])
        .expect("parse");

    match cli.command {
        Command::Conversations(ConversationsCommand { command: ConversationsSubcommand::Retag { tags, .. } }) => {
            assert_eq!(tags, vec!["work".to_owned(), "urgent".to_owned()]);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn send_requires_content() {
    assert!(Cli::try_parse_from(["chat-cli", "send", "c1"]).is_err());
}

#[test]
fn sync_errors_carry_their_code() {
    let err = CliError::from(SyncError::Auth("expired".to_owned()));
    assert!(err.to_string().starts_with("E_AUTH"));
}
