pub fn now_in_epoch_seconds() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .expect("now earlier than epoch")
        .as_secs()
}
