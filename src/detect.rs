//! The decoding pipeline: keep trying format constructors against the top
//! of the stack until a full pass recognizes nothing, then hand back
//! whatever is on top. An unrecognized stream is a valid result, not an
//! error.

use crate::{
    formats::{cpt::CptLayer, hqx::HqxLayer, macbinary::MacBinaryLayer, sit::SitLayer, sit5::Sit5Layer},
    layer::{self, Advance, Layer, Prefetch},
    Result,
};

type Sniff = fn(&mut Prefetch) -> Result<bool>;
type Build = fn(Box<dyn Layer>) -> Result<Box<dyn Layer>>;

/// Detection order: bare SIT before its v5 sibling, envelopes after the
/// archives so a `.sit` is never mistaken for the payload of something
/// else, and each pass re-enters the list so HQX around BIN around SIT
/// unwraps one layer at a time.
const FORMATS: &[(Sniff, Build)] = &[
    (SitLayer::sniff, |input| Ok(Box::new(SitLayer::new(input)?))),
    (Sit5Layer::sniff, |input| Ok(Box::new(Sit5Layer::new(input)?))),
    (HqxLayer::sniff, |input| Ok(Box::new(HqxLayer::new(input)?))),
    (MacBinaryLayer::sniff, |input| {
        Ok(Box::new(MacBinaryLayer::new(input)?))
    }),
    (CptLayer::sniff, |input| Ok(Box::new(CptLayer::new(input)?))),
];

/// Stacks recognized layers over `input` until no constructor matches.
pub fn process(input: Box<dyn Layer>) -> Result<Box<dyn Layer>> {
    let mut current = input;
    'stack: loop {
        let mut peek = Prefetch::new(current);
        for (sniff, build) in FORMATS {
            peek.rewind();
            if sniff(&mut peek)? {
                peek.rewind();
                peek.stop_recording();
                current = build(Box::new(peek))?;
                continue 'stack;
            }
        }
        peek.rewind();
        peek.stop_recording();
        return Ok(Box::new(peek));
    }
}

/// Reads up to `want` bytes from the head of the stream for a sniffer;
/// short files return what they have.
pub(crate) fn peek(input: &mut Prefetch, want: usize) -> Result<Vec<u8>> {
    if input.open(Advance::First)?.is_none() {
        return Ok(Vec::new());
    }
    let mut buf = vec![0; want];
    let n = layer::read_up_to(input, &mut buf)?;
    buf.truncate(n);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{FileInfo, MemLayer};

    #[test]
    fn raw_stream_passes_through() {
        let mut layer = process(Box::new(MemLayer::new(b"just some bytes".to_vec()))).unwrap();
        let info: FileInfo = layer.open(Advance::First).unwrap().unwrap();
        assert!(!info.has_metadata);
        assert_eq!(info.len, 15);
        let mut buf = [0; 15];
        layer::read_full(layer.as_mut(), &mut buf, "test").unwrap();
        assert_eq!(&buf, b"just some bytes");
    }

    #[test]
    fn empty_stream_passes_through() {
        let mut layer = process(Box::new(MemLayer::new(Vec::new()))).unwrap();
        let info = layer.open(Advance::First).unwrap().unwrap();
        assert_eq!(info.len, 0);
        let mut buf = [0; 4];
        assert_eq!(layer.read(&mut buf).unwrap(), 0);
    }
}
