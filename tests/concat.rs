//! Two independent sub-streams concatenated back to back, each with its
//! own metadata-direction flag, iterated as one transparent sequence.

mod common;

use a4stream::Reader;
use anyhow::Result;
use common::{build_fixture, Event, Meta};
use prost::Message;
use std::io::Cursor;

fn expected_group(event_number: u32) -> u32 {
    if event_number < 2000 {
        1
    } else {
        2
    }
}

fn run_concatenation(first_forward: bool, second_forward: bool) -> Result<()> {
    let mut combined = build_fixture(first_forward, false)?;
    combined.extend(build_fixture(second_forward, true)?);

    let reader: Reader<_> = Reader::new(Cursor::new(combined))?;
    let mut seen = 0;
    for (i, record) in reader.enumerate() {
        let record = record?;
        let event = Event::decode(&record.payload[..])?;
        let meta = record
            .current_metadata
            .map(|m| Meta::decode(&m.payload[..]))
            .transpose()?;
        assert_eq!(meta.map(|m| m.meta_data), Some(expected_group(event.event_number)));
        seen = i + 1;
    }
    assert_eq!(seen, 2000);
    Ok(())
}

/// Forward-direction sub-stream followed by another forward-direction sub-stream.
#[test]
fn forward_then_forward_substreams_concatenate() -> Result<()> {
    run_concatenation(true, true)
}

/// Forward-direction sub-stream followed by a backward-direction one (and vice versa);
/// each sub-stream's own header governs how its own content binds, independent of its neighbor.
#[test]
fn forward_then_backward_substreams_concatenate() -> Result<()> {
    run_concatenation(true, false)
}

#[test]
fn backward_then_forward_substreams_concatenate() -> Result<()> {
    run_concatenation(false, true)
}
