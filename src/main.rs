use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use log::warn;

use serde::Deserialize;
use thiserror::Error;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("error")).init();
    let spend_arg = std::env::args().nth(1).context("no spend amount specified")?;
    let points_to_spend: i64 = spend_arg
        .parse()
        .with_context(|| format!("spend amount is not an integer: {spend_arg}"))?;
    if points_to_spend < 0 {
        bail!("spend amount must be non-negative: {points_to_spend}");
    }
    let input_filename = std::env::args().nth(2).context("no input file specified")?;
    let mut csv_reader = csv_reader(&input_filename)?;

    let mut events = Vec::new();
    for result in csv_reader.deserialize() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!("failed to read record: {e}");
                continue;
            }
        };
        match Event::try_from(&record) {
            Ok(event) => events.push(event),
            Err(e) => warn!("failed to parse record: {record:?}: {e}"),
        }
    }

    let balances = process_events(events, points_to_spend)?;
    println!("{}", serde_json::to_string_pretty(&balances)?);

    Ok(())
}

#[derive(Debug, Deserialize)]
struct EventRecord {
    payer: String,
    points: i64,
    timestamp: DateTime<Utc>,
}

#[derive(Debug)]
enum Event {
    Grant {
        payer: String,
        points: i64,
        timestamp: DateTime<Utc>,
    },
    Clawback {
        payer: String,
        points: i64,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::Grant { timestamp, .. } | Event::Clawback { timestamp, .. } => *timestamp,
        }
    }
}

impl TryFrom<&EventRecord> for Event {
    type Error = anyhow::Error;

    fn try_from(record: &EventRecord) -> Result<Self, Self::Error> {
        if record.payer.is_empty() {
            bail!("empty payer");
        }
        let payer = record.payer.clone();
        let timestamp = record.timestamp;
        match record.points {
            0 => bail!("zero-point event is neither a grant nor a clawback"),
            points if points > 0 => Ok(Event::Grant {
                payer,
                points,
                timestamp,
            }),
            points => {
                let points = points
                    .checked_abs()
                    .context("clawback magnitude out of range")?;
                Ok(Event::Clawback {
                    payer,
                    points,
                    timestamp,
                })
            }
        }
    }
}

fn process_events(
    mut events: Vec<Event>,
    points_to_spend: i64,
) -> Result<BTreeMap<String, i64>, InsolvencyError> {
    // Stable sort: events with identical timestamps keep their input order.
    events.sort_by_key(Event::timestamp);

    let mut entries: Vec<PointEntry> = Vec::new();
    let mut payer_queues: HashMap<String, EntryQueue> = HashMap::new();
    let mut spend_queue = EntryQueue::default();

    for event in events {
        match event {
            Event::Grant { payer, points, .. } => {
                let index = entries.len();
                entries.push(PointEntry {
                    payer: payer.clone(),
                    points,
                });
                payer_queues.entry(payer).or_default().indices.push(index);
                spend_queue.indices.push(index);
            }
            Event::Clawback { payer, points, .. } => {
                // A clawback for a payer with no prior grants deducts from an
                // empty queue and fails as insolvent.
                let queue = payer_queues.entry(payer).or_default();
                deduct(&mut entries, queue, points)?;
            }
        }
    }

    deduct(&mut entries, &mut spend_queue, points_to_spend)?;

    let mut balances = BTreeMap::new();
    for &index in &spend_queue.indices {
        let entry = &entries[index];
        *balances.entry(entry.payer.clone()).or_insert(0) += entry.points;
    }

    Ok(balances)
}

fn deduct(
    entries: &mut [PointEntry],
    queue: &mut EntryQueue,
    amount: i64,
) -> Result<(), InsolvencyError> {
    let mut remaining = amount;
    while remaining > 0 && queue.head < queue.indices.len() {
        let entry = &mut entries[queue.indices[queue.head]];
        if remaining <= entry.points {
            entry.points -= remaining;
            remaining = 0;
        } else {
            // Also covers entries already zeroed through the other queue:
            // they contribute nothing and the head steps over them.
            remaining -= entry.points;
            entry.points = 0;
        }
        if entry.points == 0 {
            queue.head += 1;
        }
    }

    if remaining > 0 {
        return Err(InsolvencyError {
            requested: amount,
            shortfall: remaining,
        });
    }

    Ok(())
}

#[derive(Debug)]
struct PointEntry {
    payer: String,
    points: i64,
}

// Ordered view over the entry arena: a list of arena indices in grant order,
// plus a head cursor. Every entry before the head is fully spent.
#[derive(Debug, Default)]
struct EntryQueue {
    indices: Vec<usize>,
    head: usize,
}

#[derive(Debug, Error)]
#[error("cannot deduct {requested} points: available balance falls short by {shortfall}")]
struct InsolvencyError {
    requested: i64,
    shortfall: i64,
}

fn csv_reader(filename: &str) -> Result<csv::Reader<Box<dyn std::io::Read>>> {
    let reader: Box<dyn std::io::Read> = if filename == "-" {
        Box::new(std::io::stdin())
    } else {
        Box::new(std::fs::File::open(filename)?)
    };

    Ok(csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader))
}
