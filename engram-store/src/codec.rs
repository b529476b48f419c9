//! Deterministic binary format for persisted records.
//!
//! Layout rules:
//! - unsigned integers and lengths: LEB128 varints
//! - timestamps: zigzag varints of signed microseconds since the unix epoch
//! - f32: four little-endian bytes
//! - strings and maps: length-prefixed; map entries are written in the
//!   `BTreeMap` key order, so equal values always serialize identically
//! - empty sequences are written with length 0 and decode back as empty,
//!   never as absent
//!
//! Every type also has a `skip_*` so an iterator can step over a value
//! without building it. Any short or malformed buffer decodes to a Corrupt
//! error.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use engram_core::{ChatRecord, Checkpoint, Concept, ConceptRef, Error, Id, Result, Speaker};

/// Cursor over an encoded buffer.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Whether the whole buffer has been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| Error::corrupt("buffer too short"))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_byte()?;
            if shift >= 64 || (shift == 63 && byte > 1) {
                return Err(Error::corrupt("varint overflows u64"));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let raw = self.read_u64()?;
        Ok(zigzag_decode(raw))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        let bytes = self.take(4)?;
        Ok(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_len()?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Error::corrupt("string is not valid utf-8"))
    }

    fn read_len(&mut self) -> Result<usize> {
        let raw = self.read_u64()?;
        usize::try_from(raw).map_err(|_| Error::corrupt("length exceeds platform usize"))
    }

    fn skip_varint(&mut self) -> Result<()> {
        loop {
            if self.read_byte()? & 0x80 == 0 {
                return Ok(());
            }
        }
    }

    fn skip_string(&mut self) -> Result<()> {
        let len = self.read_len()?;
        self.take(len)?;
        Ok(())
    }
}

fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn zigzag_decode(raw: u64) -> i64 {
    ((raw >> 1) as i64) ^ -((raw & 1) as i64)
}

pub fn write_u64(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

fn write_i64(buf: &mut Vec<u8>, value: i64) {
    write_u64(buf, zigzag_encode(value));
}

fn write_string(buf: &mut Vec<u8>, value: &str) {
    write_u64(buf, value.len() as u64);
    buf.extend_from_slice(value.as_bytes());
}

fn write_timestamp(buf: &mut Vec<u8>, value: DateTime<Utc>) {
    write_i64(buf, value.timestamp_micros());
}

fn read_timestamp(reader: &mut Reader<'_>) -> Result<DateTime<Utc>> {
    let micros = reader.read_i64()?;
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| Error::corrupt(format!("timestamp {micros} out of range")))
}

// Id

pub fn encode_u64(value: u64) -> Vec<u8> {
    let mut buf = Vec::new();
    write_u64(&mut buf, value);
    buf
}

pub fn decode_u64(buf: &[u8]) -> Result<u64> {
    Reader::new(buf).read_u64()
}

pub fn encode_id(id: Id) -> Vec<u8> {
    encode_u64(id.0)
}

pub fn decode_id(buf: &[u8]) -> Result<Id> {
    Ok(Id(decode_u64(buf)?))
}

pub fn read_id(reader: &mut Reader<'_>) -> Result<Id> {
    Ok(Id(reader.read_u64()?))
}

pub fn skip_id(reader: &mut Reader<'_>) -> Result<()> {
    reader.skip_varint()
}

// Speaker

pub fn write_speaker(buf: &mut Vec<u8>, speaker: Speaker) {
    buf.push(speaker.wire());
}

pub fn read_speaker(reader: &mut Reader<'_>) -> Result<Speaker> {
    let byte = reader.read_byte()?;
    Speaker::from_wire(byte).ok_or_else(|| Error::corrupt(format!("invalid speaker byte {byte}")))
}

pub fn skip_speaker(reader: &mut Reader<'_>) -> Result<()> {
    reader.take(1)?;
    Ok(())
}

// ConceptRef

pub fn write_concept_ref(buf: &mut Vec<u8>, concept_ref: &ConceptRef) {
    write_u64(buf, concept_ref.concept_id.0);
    buf.push(concept_ref.importance);
}

pub fn read_concept_ref(reader: &mut Reader<'_>) -> Result<ConceptRef> {
    let concept_id = read_id(reader)?;
    let importance = reader.read_byte()?;
    Ok(ConceptRef {
        concept_id,
        importance,
    })
}

pub fn skip_concept_ref(reader: &mut Reader<'_>) -> Result<()> {
    reader.skip_varint()?;
    reader.take(1)?;
    Ok(())
}

// Shared sequence helpers

fn write_vector(buf: &mut Vec<u8>, vector: &[f32]) {
    write_u64(buf, vector.len() as u64);
    for value in vector {
        buf.extend_from_slice(&value.to_le_bytes());
    }
}

fn read_vector(reader: &mut Reader<'_>) -> Result<Vec<f32>> {
    let len = reader.read_len()?;
    let mut vector = Vec::with_capacity(len.min(4096));
    for _ in 0..len {
        vector.push(reader.read_f32()?);
    }
    Ok(vector)
}

fn skip_vector(reader: &mut Reader<'_>) -> Result<()> {
    let len = reader.read_len()?;
    let bytes = len
        .checked_mul(4)
        .ok_or_else(|| Error::corrupt("vector length overflow"))?;
    reader.take(bytes)?;
    Ok(())
}

fn write_metadata(buf: &mut Vec<u8>, metadata: &BTreeMap<String, String>) {
    write_u64(buf, metadata.len() as u64);
    for (key, value) in metadata {
        write_string(buf, key);
        write_string(buf, value);
    }
}

fn read_metadata(reader: &mut Reader<'_>) -> Result<BTreeMap<String, String>> {
    let len = reader.read_len()?;
    let mut metadata = BTreeMap::new();
    for _ in 0..len {
        let key = reader.read_string()?;
        let value = reader.read_string()?;
        metadata.insert(key, value);
    }
    Ok(metadata)
}

fn skip_metadata(reader: &mut Reader<'_>) -> Result<()> {
    let len = reader.read_len()?;
    for _ in 0..len {
        reader.skip_string()?;
        reader.skip_string()?;
    }
    Ok(())
}

// ChatRecord

pub fn encode_chat_record(record: &ChatRecord) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64 + record.contents.len() + record.vector.len() * 4);
    write_u64(&mut buf, record.id.0);
    write_speaker(&mut buf, record.speaker);
    write_string(&mut buf, &record.contents);
    write_timestamp(&mut buf, record.timestamp);
    write_timestamp(&mut buf, record.inserted_at);
    write_timestamp(&mut buf, record.updated_at);
    write_u64(&mut buf, record.concepts.len() as u64);
    for concept_ref in &record.concepts {
        write_concept_ref(&mut buf, concept_ref);
    }
    write_vector(&mut buf, &record.vector);
    write_metadata(&mut buf, &record.metadata);
    buf
}

pub fn decode_chat_record(buf: &[u8]) -> Result<ChatRecord> {
    read_chat_record(&mut Reader::new(buf))
}

pub fn read_chat_record(reader: &mut Reader<'_>) -> Result<ChatRecord> {
    let id = read_id(reader)?;
    let speaker = read_speaker(reader)?;
    let contents = reader.read_string()?;
    let timestamp = read_timestamp(reader)?;
    let inserted_at = read_timestamp(reader)?;
    let updated_at = read_timestamp(reader)?;
    let concept_count = reader.read_len()?;
    let mut concepts = Vec::with_capacity(concept_count.min(1024));
    for _ in 0..concept_count {
        concepts.push(read_concept_ref(reader)?);
    }
    let vector = read_vector(reader)?;
    let metadata = read_metadata(reader)?;
    Ok(ChatRecord {
        id,
        speaker,
        contents,
        timestamp,
        inserted_at,
        updated_at,
        concepts,
        vector,
        metadata,
    })
}

pub fn skip_chat_record(reader: &mut Reader<'_>) -> Result<()> {
    skip_id(reader)?;
    skip_speaker(reader)?;
    reader.skip_string()?;
    reader.skip_varint()?;
    reader.skip_varint()?;
    reader.skip_varint()?;
    let concept_count = reader.read_len()?;
    for _ in 0..concept_count {
        skip_concept_ref(reader)?;
    }
    skip_vector(reader)?;
    skip_metadata(reader)
}

// Concept

pub fn encode_concept(concept: &Concept) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32 + concept.name.len() + concept.vector.len() * 4);
    write_u64(&mut buf, concept.id.0);
    write_string(&mut buf, &concept.name);
    write_string(&mut buf, &concept.concept_type);
    write_vector(&mut buf, &concept.vector);
    write_timestamp(&mut buf, concept.inserted_at);
    write_timestamp(&mut buf, concept.updated_at);
    buf
}

pub fn decode_concept(buf: &[u8]) -> Result<Concept> {
    read_concept(&mut Reader::new(buf))
}

pub fn read_concept(reader: &mut Reader<'_>) -> Result<Concept> {
    let id = read_id(reader)?;
    let name = reader.read_string()?;
    let concept_type = reader.read_string()?;
    let vector = read_vector(reader)?;
    let inserted_at = read_timestamp(reader)?;
    let updated_at = read_timestamp(reader)?;
    Ok(Concept {
        id,
        name,
        concept_type,
        vector,
        inserted_at,
        updated_at,
    })
}

pub fn skip_concept(reader: &mut Reader<'_>) -> Result<()> {
    skip_id(reader)?;
    reader.skip_string()?;
    reader.skip_string()?;
    skip_vector(reader)?;
    reader.skip_varint()?;
    reader.skip_varint()?;
    Ok(())
}

// Checkpoint

pub fn encode_checkpoint(checkpoint: &Checkpoint) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + checkpoint.processor_type.len());
    write_string(&mut buf, &checkpoint.processor_type);
    write_u64(&mut buf, checkpoint.last_id.0);
    write_timestamp(&mut buf, checkpoint.updated_at);
    buf
}

pub fn decode_checkpoint(buf: &[u8]) -> Result<Checkpoint> {
    read_checkpoint(&mut Reader::new(buf))
}

pub fn read_checkpoint(reader: &mut Reader<'_>) -> Result<Checkpoint> {
    let processor_type = reader.read_string()?;
    let last_id = read_id(reader)?;
    let updated_at = read_timestamp(reader)?;
    Ok(Checkpoint {
        processor_type,
        last_id,
        updated_at,
    })
}

pub fn skip_checkpoint(reader: &mut Reader<'_>) -> Result<()> {
    reader.skip_string()?;
    skip_id(reader)?;
    reader.skip_varint()?;
    Ok(())
}
