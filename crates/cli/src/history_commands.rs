use {
    chrono::{DateTime, Local},
    tether_config::TetherConfig,
    tether_mirror::{Sender, Turn, TurnStatus, TurnStore},
};

pub async fn handle_history(config: &TetherConfig, limit: usize, clear: bool) -> anyhow::Result<()> {
    let path = tether_config::data_dir(config).join(tether_mirror::DATABASE_FILE);
    if !path.exists() {
        println!("No history yet.");
        return Ok(());
    }
    let store = TurnStore::open(&path).await?;

    if clear {
        let removed = store.clear().await?;
        println!("Deleted {removed} turn(s).");
        return Ok(());
    }

    let mut turns = store.recent(limit).await?;
    if turns.is_empty() {
        println!("No history yet.");
        return Ok(());
    }
    turns.reverse();
    for turn in &turns {
        println!("{}", format_turn(turn));
    }
    Ok(())
}

/// One line per turn: `[HH:MM] who> text`, with a marker on failed or
/// pending sends and a note of attached images.
pub fn format_turn(turn: &Turn) -> String {
    let time = DateTime::from_timestamp_millis(turn.timestamp)
        .map(|t| t.with_timezone(&Local).format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".into());
    let who = match turn.sender {
        Sender::User => "you",
        Sender::Agent => "agent",
    };
    let mut line = format!("[{time}] {who}> {}", turn.content);
    if !turn.images.is_empty() {
        line.push_str(&format!(" [{} image(s)]", turn.images.len()));
    }
    match turn.status {
        TurnStatus::Failed => line.push_str(" (not delivered)"),
        TurnStatus::Sending => line.push_str(" (sending)"),
        TurnStatus::Sent | TurnStatus::Received => {},
    }
    line
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, tether_mirror::ImageData};

    #[test]
    fn failed_turns_are_marked() {
        let mut turn = Turn::outgoing("hello", vec![]);
        turn.status = TurnStatus::Failed;
        let line = format_turn(&turn);
        assert!(line.contains("you> hello"));
        assert!(line.ends_with("(not delivered)"));
    }

    #[test]
    fn images_are_counted() {
        let mut turn = Turn::outgoing("look", vec![ImageData {
            path: "/tmp/a.jpg".into(),
            width: 1,
            height: 1,
        }]);
        turn.status = TurnStatus::Sent;
        assert!(format_turn(&turn).ends_with("look [1 image(s)]"));
    }

    #[test]
    fn bad_timestamp_still_renders() {
        let mut turn = Turn::outgoing("x", vec![]);
        turn.timestamp = i64::MAX;
        assert!(format_turn(&turn).starts_with("[--:--]"));
    }
}
