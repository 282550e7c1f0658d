use assert_matches::assert_matches;
use chrono::{DateTime, TimeZone, Utc};
use eventio::{BufferConfig, IoBuffer, ItemHeader, RaisingItem};
use eventio_history::{
    list_history, list_history_in, read_history, Error, History, COMMAND_LINE, CONFIG_LINE,
    HISTORY,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn at(sec: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, sec).unwrap()
}

fn sample() -> History {
    let mut history = History::new();
    history.push_command_at(["sim_telarray", "-c", "cta.cfg"], at(0));
    history.push_config_at("ALTITUDE 1800", true, at(1));
    history.push_config_at("TRIGGER_PIXELS 3\nTRIGGER_TIME 2", true, at(2));
    history.push_config_at("ALTITUDE 2150", true, at(3));
    history
}

fn reopen(buf: IoBuffer) -> IoBuffer {
    IoBuffer::from_bytes(buf.into_bytes(), BufferConfig::default()).unwrap()
}

#[test]
fn test_write_and_read_history() {
    init_logger();
    let history = sample();
    let mut buf = IoBuffer::default();
    let header = history.write(&mut buf, 7).unwrap();
    assert_eq!(header.type_code, HISTORY);
    assert_eq!(header.version, 1);
    assert!(header.can_search);

    let mut trailer = RaisingItem::write(&mut buf, &ItemHeader::new(99, 0, 0)).unwrap();
    trailer.put(1u8).unwrap();
    trailer.end().into_result().unwrap();

    let mut input = reopen(buf);
    let block = read_history(&mut input).unwrap();
    assert_eq!(block.ident, 7);
    assert_eq!(block.command.as_ref(), history.command());
    assert_eq!(block.configs, history.configs());
    assert_eq!(block.configs[0].text, "ALTITUDE 2150");
    assert_eq!(block.configs[0].time, at(3));

    let next = RaisingItem::read(&mut input, Some(99)).unwrap();
    next.end().into_result().unwrap();
}

#[test]
fn test_list_history() {
    let mut buf = IoBuffer::default();
    sample().write(&mut buf, 7).unwrap();
    let listing = list_history_in(&mut reopen(buf), &Utc).unwrap();
    assert_eq!(
        listing,
        "\nHistory block (ident 7):\n\
         \x20  Command line (dated 2024-03-01 12:30:00, ident 7):\n\
         \x20     sim_telarray -c cta.cfg\n\
         \x20  Configuration data:\n\
         \x20     ALTITUDE 2150\n\
         \x20     TRIGGER_PIXELS 3\n\
         \x20     TRIGGER_TIME 2\n\
         End of history block\n"
    );
}

#[test]
fn test_list_empty_history_in_local_time() {
    let mut buf = IoBuffer::default();
    History::new().write(&mut buf, 0).unwrap();
    assert_eq!(
        list_history(&mut reopen(buf)).unwrap(),
        "\nHistory block:\n   Configuration data:\nEnd of history block\n"
    );
}

#[test]
fn test_wrong_version_is_skipped() {
    init_logger();
    let mut buf = IoBuffer::default();
    for (type_code, version) in [(HISTORY, 2), (99, 0)] {
        let item = RaisingItem::write(&mut buf, &ItemHeader::new(type_code, version, 0)).unwrap();
        item.end().into_result().unwrap();
    }

    let mut input = reopen(buf);
    assert_matches!(
        read_history(&mut input),
        Err(Error::UnsupportedVersion {
            type_code: HISTORY,
            version: 2
        })
    );
    RaisingItem::read(&mut input, Some(99)).unwrap().end();
}

#[test]
fn test_unknown_entries_are_skipped() {
    init_logger();
    let mut buf = IoBuffer::default();
    {
        let mut block = RaisingItem::write(&mut buf, &ItemHeader::new(HISTORY, 1, 3)).unwrap();
        for type_code in [80, COMMAND_LINE, 81, CONFIG_LINE] {
            let mut sub = block.write_sub(&ItemHeader::new(type_code, 1, 3)).unwrap();
            sub.put(1_700_000_000i32).unwrap();
            sub.put_string(&format!("entry {type_code}")).unwrap();
            sub.end().into_result().unwrap();
        }
        block.end().into_result().unwrap();
    }

    let block = read_history(&mut reopen(buf)).unwrap();
    assert_eq!(block.ident, 3);
    assert_eq!(block.command.unwrap().text, "entry 71");
    assert_eq!(block.configs.len(), 1);
    assert_eq!(block.configs[0].text, "entry 72");
    assert_eq!(block.configs[0].time.timestamp(), 1_700_000_000);
}

#[test]
fn test_unwritable_time_leaves_no_block() {
    init_logger();
    let mut history = History::new();
    history.push_command_at(["run"], Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap());
    let mut buf = IoBuffer::default();
    assert_matches!(
        history.write(&mut buf, 1),
        Err(Error::Eventio(eventio::Error::RangeError { .. }))
    );
    assert!(buf.is_empty());
    assert_eq!(buf.depth(), 0);
}
