use std::collections::VecDeque;

use log::{debug, info};
use rust_htslib::bam::{record::Aux, Read, Reader, Record};

use crate::config::Direction;
use crate::em::queue::ParseChannels;
use crate::error::Result;
use crate::fragments::{FragHit, Fragment, InvalidReason, PairStatus, ReadHit};
use crate::output::AlignmentWriter;
use crate::targets::TargetTable;

#[derive(Clone)]
pub(crate) enum ParseEvent {
    Fragment(Fragment),
    Invalid(ReadHit),
}

// One pass over an input, from its first record. Lives on the parse thread only.
pub(crate) trait EventStream {
    fn next_event(&mut self) -> Result<Option<ParseEvent>>;
}

/*
    An alignment input that can be read once per round. open() streams from the
    start only after a reset_reader(); a source that has not been rewound streams
    nothing.
*/
pub(crate) trait FragmentSource: Send {
    fn name(&self) -> &str;
    fn open(&mut self) -> Result<Box<dyn EventStream>>;
    fn reset_reader(&mut self);
}

struct Exhausted;

impl EventStream for Exhausted {
    fn next_event(&mut self) -> Result<Option<ParseEvent>> {
        Ok(None)
    }
}

/*
    Reads the (name, length) of every target listed in the header of a SAM/BAM file,
    in header order.
*/
pub(crate) fn read_header(path: &str) -> Result<Vec<(String, u32)>> {
    let reader = Reader::from_path(path)?;
    let header = reader.header();
    let targets = (0..header.target_count())
        .map(|tid| {
            let name = String::from_utf8_lossy(header.tid2name(tid)).into_owned();
            let len = header.target_len(tid).unwrap_or(0) as u32;
            (name, len)
        })
        .collect();
    Ok(targets)
}

/*
    A SAM/BAM file whose records are grouped by read name. Target ids are the header
    tids, so every input has to carry the header the TargetTable was built from.
*/
pub(crate) struct BamSource {
    path: String,
    num_targets: usize,
    direction: Direction,
    at_start: bool,
}

impl BamSource {
    pub(crate) fn new(path: &str, num_targets: usize, direction: Direction) -> BamSource {
        BamSource { path: path.to_string(), num_targets, direction, at_start: true }
    }
}

impl FragmentSource for BamSource {
    fn name(&self) -> &str {
        &self.path
    }

    fn open(&mut self) -> Result<Box<dyn EventStream>> {
        if !self.at_start {
            return Ok(Box::new(Exhausted));
        }
        self.at_start = false;
        debug!("Opening {}", self.path);
        let reader = Reader::from_path(&self.path)?;
        Ok(Box::new(BamStream {
            reader,
            record: Record::new(),
            num_targets: self.num_targets,
            direction: self.direction,
            current: None,
            invalid: VecDeque::new(),
        }))
    }

    fn reset_reader(&mut self) {
        self.at_start = true;
    }
}

/*
    current: fragment collecting the hits of the read name being read
    invalid: records to report before reading further
*/
struct BamStream {
    reader: Reader,
    record: Record,
    num_targets: usize,
    direction: Direction,
    current: Option<Fragment>,
    invalid: VecDeque<ReadHit>,
}

impl EventStream for BamStream {
    fn next_event(&mut self) -> Result<Option<ParseEvent>> {
        loop {
            if let Some(hit) = self.invalid.pop_front() {
                return Ok(Some(ParseEvent::Invalid(hit)));
            }
            match self.reader.read(&mut self.record) {
                None => return Ok(self.current.take().map(ParseEvent::Fragment)),
                Some(result) => result?,
            }

            let name = String::from_utf8_lossy(self.record.qname()).into_owned();
            let hit = match classify(&self.record, self.num_targets, self.direction) {
                Ok(Some(hit)) => hit,
                // second mate of a pair, already covered by the first
                Ok(None) => continue,
                Err(reason) => {
                    self.invalid.push_back(ReadHit::new(name, reason));
                    continue;
                }
            };
            if let Some(frag) = self.current.as_mut() {
                if frag.name() == name {
                    frag.add_hit(hit);
                    continue;
                }
            }
            let mut next = Fragment::new(name);
            next.add_hit(hit);
            if let Some(done) = self.current.replace(next) {
                return Ok(Some(ParseEvent::Fragment(done)));
            }
        }
    }
}

fn nm_tag(record: &Record) -> u32 {
    match record.aux(b"NM") {
        Ok(Aux::U8(v)) => v as u32,
        Ok(Aux::U16(v)) => v as u32,
        Ok(Aux::U32(v)) => v,
        Ok(Aux::I8(v)) => v.max(0) as u32,
        Ok(Aux::I16(v)) => v.max(0) as u32,
        Ok(Aux::I32(v)) => v.max(0) as u32,
        _ => 0,
    }
}

// the fragment runs forward when read 1 does; a lone read 2 points the other way
fn fragment_forward(record: &Record) -> bool {
    if record.is_paired() && record.is_last_in_template() {
        record.is_reverse()
    } else {
        !record.is_reverse()
    }
}

/*
    Turns one record into a hit. A properly placed pair becomes one PAIRED hit taken
    from the first mate and spanning the template; anything else is a single end,
    LEFT_ONLY on the forward strand and RIGHT_ONLY on the reverse. Hits in an
    orientation the library protocol cannot produce are rejected.
*/
fn classify(record: &Record, num_targets: usize, direction: Direction) -> std::result::Result<Option<FragHit>, InvalidReason> {
    if record.is_unmapped() {
        return Err(InvalidReason::Unmapped);
    }
    let tid = record.tid();
    if tid < 0 || tid as usize >= num_targets {
        return Err(InvalidReason::UnknownTarget);
    }

    let paired = record.is_paired() && !record.is_mate_unmapped() && record.mtid() == tid;
    if paired && !record.is_first_in_template() {
        return Ok(None);
    }
    match (direction, fragment_forward(record)) {
        (Direction::Fr, false) | (Direction::Rf, true) => return Err(InvalidReason::WrongStrand),
        _ => {}
    }

    let (left, right, status) = if paired {
        let left = record.pos().min(record.mpos());
        (left, left + record.insert_size().abs(), PairStatus::Paired)
    } else if record.is_reverse() {
        (record.pos(), record.cigar().end_pos(), PairStatus::RightOnly)
    } else {
        (record.pos(), record.cigar().end_pos(), PairStatus::LeftOnly)
    };

    let left = u32::try_from(left).map_err(|_| InvalidReason::BadCoordinates)?;
    let right = u32::try_from(right).map_err(|_| InvalidReason::BadCoordinates)?;
    if right <= left {
        return Err(InvalidReason::BadCoordinates);
    }
    let hit = FragHit::new(tid as usize, left, right, status).with_mismatches(nm_tag(record), record.seq_len() as u32);
    Ok(Some(hit))
}

/*
    The parse side of a Library: its input, the alignment writer fed by the
    post-processing stage, and whether that writer is used this round.
*/
pub(crate) struct MapParser {
    source: Box<dyn FragmentSource>,
    writer: Option<AlignmentWriter>,
    write_active: bool,
}

// The half of a MapParser that runs on the parse thread.
pub(crate) struct ParseStage<'a> {
    source: &'a mut Box<dyn FragmentSource>,
}

impl MapParser {
    pub(crate) fn new(source: Box<dyn FragmentSource>, writer: Option<AlignmentWriter>, write_active: bool) -> MapParser {
        MapParser { source, writer, write_active }
    }

    pub(crate) fn write_active(&mut self, active: bool) {
        self.write_active = active;
    }

    pub(crate) fn reset_reader(&mut self) {
        self.source.reset_reader();
    }

    // splits the parser into the parse stage and, if it writes this round, the alignment writer
    pub(crate) fn stages(&mut self) -> (ParseStage<'_>, Option<&mut AlignmentWriter>) {
        let writer = if self.write_active { self.writer.as_mut() } else { None };
        (ParseStage { source: &mut self.source }, writer)
    }
}

impl ParseStage<'_> {
    /*
        Streams the input into the channels until it ends, `stop_at` fragments have been
        sent (0 for no limit) or the driver aborts. The end sentinels are pushed in every
        case, including a read error, so the consumers always finish.
    */
    pub(crate) fn threaded_parse(self, channels: &ParseChannels, targets: &TargetTable, stop_at: usize) -> Result<usize> {
        let name = self.source.name().to_string();
        let result = self.source.open().and_then(|mut stream| {
            let mut num_frags = 0;
            while !channels.aborted() && (stop_at == 0 || num_frags < stop_at) {
                match stream.next_event()? {
                    Some(ParseEvent::Fragment(frag)) => {
                        targets.merge_bundles(&frag);
                        channels.proc_in.push(Some(frag));
                        num_frags += 1;
                    }
                    Some(ParseEvent::Invalid(hit)) => {
                        channels.proc_invalid.push(Some(hit));
                    }
                    None => break,
                }
            }
            Ok(num_frags)
        });
        channels.proc_in.push(None);
        channels.proc_invalid.push(None);

        if let Ok(num_frags) = &result {
            if stop_at > 0 && *num_frags == stop_at {
                info!("Stopped reading {} after {} fragments", name, num_frags);
            }
        }
        result
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    // A source over events kept in memory, rewound like a file.
    pub(crate) struct VecSource {
        events: Vec<ParseEvent>,
        at_start: bool,
    }

    impl VecSource {
        pub(crate) fn new(events: Vec<ParseEvent>) -> VecSource {
            VecSource { events, at_start: true }
        }

        pub(crate) fn fragments(frags: Vec<Fragment>) -> VecSource {
            VecSource::new(frags.into_iter().map(ParseEvent::Fragment).collect())
        }
    }

    struct VecStream {
        events: std::vec::IntoIter<ParseEvent>,
    }

    impl EventStream for VecStream {
        fn next_event(&mut self) -> Result<Option<ParseEvent>> {
            Ok(self.events.next())
        }
    }

    impl FragmentSource for VecSource {
        fn name(&self) -> &str {
            "memory"
        }

        fn open(&mut self) -> Result<Box<dyn EventStream>> {
            if !self.at_start {
                return Ok(Box::new(Exhausted));
            }
            self.at_start = false;
            Ok(Box::new(VecStream { events: self.events.clone().into_iter() }))
        }

        fn reset_reader(&mut self) {
            self.at_start = true;
        }
    }
}
