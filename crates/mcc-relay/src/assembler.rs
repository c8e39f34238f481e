//! Reassembly of multi-packet device requests.

use std::collections::HashMap;

use tracing::{error, warn};

use mcc_relay_core::MissingPacketPolicy;

use crate::job::{RawPacket, RelayJob};

/// Group raw packets into jobs.
///
/// Jobs come out in the order their first packet was seen. Each job's data is
/// the concatenation of packets `0..total` by index; the declared total is
/// the largest seen among the job's packets. Packets outside that range and
/// repeated indices are ignored. When an index is missing, `policy` decides
/// whether the job is still produced from the bytes that did arrive.
pub fn assemble(rows: Vec<RawPacket>, policy: MissingPacketPolicy) -> Vec<RelayJob> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<RawPacket>> = HashMap::new();
    for row in rows {
        let group = groups.entry(row.job_token.clone()).or_insert_with(|| {
            order.push(row.job_token.clone());
            Vec::new()
        });
        group.push(row);
    }

    order
        .into_iter()
        .filter_map(|token| groups.remove(&token))
        .filter_map(|packets| assemble_one(packets, policy))
        .collect()
}

/// How many missing indices are named in the log line for a gapped job.
const MISSING_SAMPLE: usize = 10;

fn assemble_one(mut packets: Vec<RawPacket>, policy: MissingPacketPolicy) -> Option<RelayJob> {
    let total = packets.iter().map(RawPacket::total).max().unwrap_or(1).max(1);
    // Stable sort keeps the first copy of a repeated index in front.
    packets.sort_by_key(RawPacket::index);
    packets.dedup_by_key(|p| p.index());

    let first = packets.first()?;
    let job_token = first.job_token.clone();
    let app_uuid = first.app_uuid.clone();
    let tenant = first.tenant.clone();

    let in_range = packets.partition_point(|p| p.index() < total);
    if in_range < packets.len() {
        warn!(job_token = %job_token, total, "Ignoring packets beyond declared total");
        packets.truncate(in_range);
    }

    // The declared total is device-supplied, so gaps are counted rather than
    // walked index by index.
    let missing = total - packets.len();
    if missing > 0 {
        let sample = missing_sample(&packets, total, MISSING_SAMPLE);
        match policy {
            MissingPacketPolicy::Deliver => error!(
                job_token = %job_token,
                total,
                missing,
                first_missing = ?sample,
                "Job has missing packets, delivering partial data"
            ),
            MissingPacketPolicy::Drop => {
                error!(
                    job_token = %job_token,
                    total,
                    missing,
                    first_missing = ?sample,
                    "Job has missing packets, dropping"
                );
                return None;
            }
        }
    }

    let data = packets.iter().map(|p| p.data.as_str()).collect();
    Some(RelayJob {
        app_uuid,
        job_token,
        data,
        tenant,
        suppress_errors: false,
    })
}

/// Up to `limit` absent indices below `total`, given packets sorted by
/// distinct index.
fn missing_sample(packets: &[RawPacket], total: usize, limit: usize) -> Vec<usize> {
    let mut sample = Vec::new();
    let mut expected = 0;
    for index in packets.iter().map(RawPacket::index).chain([total]) {
        while expected < index && sample.len() < limit {
            sample.push(expected);
            expected += 1;
        }
        if sample.len() == limit {
            break;
        }
        expected = index + 1;
    }
    sample
}
