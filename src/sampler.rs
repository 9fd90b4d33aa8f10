//! Two-phase fragment sampling.
//!
//! Phase A walks the target's length -> demand table single-threaded,
//! drawing source transcripts from the pool (weighted by remaining counts,
//! decrementing per pick) and recording shortfalls as missing. The result
//! is a per-transcript request map, so Phase A alone fixes *which*
//! fragments get emitted for a given seed.
//!
//! Phase B processes one transcript at a time: the spilled fragment table
//! is re-hydrated, each requested length's `(starts, ends, counts)` entry
//! is moved out of the table into a request, and requests fan out over
//! worker threads through bounded channels. Workers own their requests and
//! a split-off generator, so they mutate nothing shared; the receiver
//! assigns monotonic fragment ids and writes FASTA records.

use std::io::Write;
use std::thread;

use crossbeam_channel::bounded;
use tracing::info;

use crate::error::{SimError, SimResult};
use crate::frag::{FragRecord, Strand};
use crate::fragstats::FragStats;
use crate::pool::Pool;
use crate::random::RandGen;
use crate::target::Target;
use crate::transcript::{LenEntry, Transcript};

/// Capacity of the request and fragment channels in Phase B.
const CHANNEL_CAP: usize = 500;

/// One unit of Phase-B work: draw `count` fragments of `length` from an
/// owned table entry.
struct Request {
    length: u32,
    entry: LenEntry,
    count: u64,
}

/// A drawn fragment before id assignment.
struct Draw {
    start: u32,
    end: u32,
    strand: Strand,
}

pub struct Sampler {
    strand_bias: f64,
    workers: usize,
}

impl Sampler {
    pub fn new(strand_bias: f64, max_procs: usize) -> Sampler {
        Sampler {
            strand_bias,
            workers: max_procs.saturating_sub(1).max(1),
        }
    }

    /// Phase A: satisfy the target demand length by length. Returns the
    /// per-transcript request lists, ordered by transcript id.
    fn sample_transcripts(
        &self,
        pool: &mut Pool,
        target: &mut Target,
        stats: &mut FragStats,
        rng: &mut RandGen,
    ) -> SimResult<Vec<(u64, Vec<(u32, u64)>)>> {
        let mut requests: ahash::AHashMap<u64, ahash::AHashMap<u32, u64>> =
            ahash::AHashMap::new();

        while let Some((length, count)) = target.next_len_count() {
            let mut drawn = 0u64;
            while drawn < count {
                match pool.sample_transcript(length, rng)? {
                    Some(tr_id) => {
                        *requests
                            .entry(tr_id)
                            .or_default()
                            .entry(length)
                            .or_insert(0) += 1;
                        drawn += 1;
                    }
                    None => break,
                }
            }

            stats.update_sampled(length, drawn);
            stats.update_after_sampling(length, drawn)?;
            let missing = count.checked_sub(drawn).ok_or_else(|| {
                SimError::Numeric(format!(
                    "negative missing count at length {}: drew {} of {}",
                    length, drawn, count
                ))
            })?;
            stats.update_missing(length, missing);
            pool.jettison_len(length);
        }

        let mut by_tr: Vec<(u64, Vec<(u32, u64)>)> = requests
            .into_iter()
            .map(|(tr_id, lens)| {
                let mut lens: Vec<(u32, u64)> = lens.into_iter().collect();
                lens.sort_unstable_by_key(|(l, _)| *l);
                (tr_id, lens)
            })
            .collect();
        by_tr.sort_unstable_by_key(|(tr_id, _)| *tr_id);
        Ok(by_tr)
    }

    /// Run both phases, writing fragment records to `out`. Returns the
    /// number of fragments emitted.
    pub fn sample_fragments<W: Write>(
        &self,
        pool: &mut Pool,
        target: &mut Target,
        registry: &mut [Transcript],
        stats: &mut FragStats,
        rng: &mut RandGen,
        out: &mut W,
    ) -> SimResult<u64> {
        let (low, high) = (target.low(), target.high());
        let by_tr = self.sample_transcripts(pool, target, stats, rng)?;

        let mut frag_count = 0u64;
        for (tr_id, lens) in by_tr {
            let tr = registry
                .get_mut(tr_id as usize)
                .filter(|tr| tr.id() == tr_id)
                .ok_or_else(|| {
                    SimError::Sampler(format!("unknown transcript id {} in request map", tr_id))
                })?;
            tr.rehydrate()?;

            let mut requests = Vec::with_capacity(lens.len());
            for (length, count) in lens {
                let entry = tr.take_len_entry(length).ok_or_else(|| {
                    SimError::Sampler(format!(
                        "transcript {} promised fragments of length {} but has none",
                        tr.name(),
                        length
                    ))
                })?;
                requests.push(Request {
                    length,
                    entry,
                    count,
                });
            }
            // Whatever was not requested is never needed again.
            tr.jettison_frag_table();

            let worker_rngs: Vec<RandGen> = (0..self.workers).map(|_| rng.split()).collect();
            let tr: &Transcript = &registry[tr_id as usize];
            frag_count = self.drain_transcript(
                tr,
                requests,
                worker_rngs,
                (low, high),
                frag_count,
                out,
            )?;
        }

        info!("Sampled {} fragments.", frag_count);
        info!(
            "Missing fragments: {}",
            target.req_frags().saturating_sub(frag_count)
        );
        Ok(frag_count)
    }

    /// Fan one transcript's requests out over the workers and serialize
    /// the drawn fragments. Returns the updated fragment counter.
    fn drain_transcript<W: Write>(
        &self,
        tr: &Transcript,
        requests: Vec<Request>,
        worker_rngs: Vec<RandGen>,
        bounds: (u64, u64),
        mut frag_count: u64,
        out: &mut W,
    ) -> SimResult<u64> {
        let (low, high) = bounds;
        let strand_bias = self.strand_bias;
        let (req_tx, req_rx) = bounded::<Request>(CHANNEL_CAP);
        let (frag_tx, frag_rx) = bounded::<SimResult<Draw>>(CHANNEL_CAP);

        let mut failure: Option<SimError> = None;
        thread::scope(|s| {
            for mut wrng in worker_rngs {
                let req_rx = req_rx.clone();
                let frag_tx = frag_tx.clone();
                let tr_name = tr.name().to_string();
                s.spawn(move || {
                    for mut req in req_rx.iter() {
                        for _ in 0..req.count {
                            let msg = draw_fragment(&mut req, &tr_name, strand_bias, &mut wrng);
                            let failed = msg.is_err();
                            if frag_tx.send(msg).is_err() || failed {
                                return;
                            }
                        }
                    }
                });
            }
            drop(req_rx);
            drop(frag_tx);

            s.spawn(move || {
                for req in requests {
                    if req_tx.send(req).is_err() {
                        return;
                    }
                }
            });

            for msg in frag_rx.iter() {
                if failure.is_some() {
                    continue;
                }
                match msg.and_then(|draw| {
                    emit(tr, draw, frag_count, (low, high), out)
                }) {
                    Ok(()) => frag_count += 1,
                    Err(e) => failure = Some(e),
                }
            }
        });

        match failure {
            Some(e) => Err(e),
            None => Ok(frag_count),
        }
    }
}

/// Worker-side draw: weighted pick of one (start, end) occurrence, count
/// decrement, strand assignment.
fn draw_fragment(
    req: &mut Request,
    tr_name: &str,
    strand_bias: f64,
    rng: &mut RandGen,
) -> SimResult<Draw> {
    let idx = rng.sample_index_u64(&req.entry.counts)?.ok_or_else(|| {
        SimError::Sampler(format!(
            "transcript {} ran out of fragments of length {} mid-request",
            tr_name, req.length
        ))
    })?;
    req.entry.counts[idx] -= 1;
    let strand = if rng.f64() < strand_bias {
        Strand::Minus
    } else {
        Strand::Plus
    };
    Ok(Draw {
        start: req.entry.starts[idx],
        end: req.entry.ends[idx],
        strand,
    })
}

/// Receiver-side emit: assign the id, check the size invariant, write the
/// record.
fn emit<W: Write>(
    tr: &Transcript,
    draw: Draw,
    id: u64,
    bounds: (u64, u64),
    out: &mut W,
) -> SimResult<()> {
    let size = (draw.end - draw.start) as u64;
    if size < bounds.0 || size > bounds.1 {
        return Err(SimError::Sampler(format!(
            "emitted fragment size {} violates bounds [{}, {}]",
            size, bounds.0, bounds.1
        )));
    }
    let rec = FragRecord {
        id,
        start: draw.start,
        end: draw.end,
        strand: draw.strand,
    };
    debug_assert_eq!(
        tr.fragment_seq(rec.start, rec.end, rec.strand).len() as u64,
        size
    );
    writeln!(out, "{}", rec.to_fasta(tr))?;
    Ok(())
}
