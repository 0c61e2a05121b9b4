//! Level 5 MAT-file layout walking.
//!
//! `matfile` decodes numeric arrays but skips structs, and it rejects the
//! empty names that struct members carry. The simulator nests its case in
//! structs (`mpc`, `mdi.mpc`, `mdi.Storage`), so this module walks the
//! element tree, inflates compressed variables, and re-encodes every
//! numeric member as a top-level array named by its dotted path
//! (`mdi.Storage.gen`). The result is handed back to `matfile`.

use anyhow::{anyhow, bail, Context, Result};
use libflate::zlib::Decoder;
use matfile::{Array, MatFile};
use nom::bytes::complete::take;
use nom::number::complete::u32 as parse_u32;
use nom::number::Endianness;
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::debug;

const HEADER_LEN: usize = 128;
const HEADER_TEXT_LEN: usize = 116;

const MI_INT8: u32 = 1;
const MI_MATRIX: u32 = 14;
const MI_COMPRESSED: u32 = 15;

const MX_STRUCT: u32 = 2;
const MX_DOUBLE: u32 = 6;
const MX_UINT64: u32 = 15;

type Parsed<'a, T> = nom::IResult<&'a [u8], T>;
type NomError<'a> = nom::Err<nom::error::Error<&'a [u8]>>;

#[derive(Debug, Clone, Copy)]
struct Tag {
    kind: u32,
    size: usize,
    /// Small data element: payload packed into the tag's second word
    small: bool,
}

fn padding(size: usize) -> usize {
    (8 - size % 8) % 8
}

fn malformed(context: &str, err: NomError<'_>) -> anyhow::Error {
    match err {
        nom::Err::Incomplete(_) => anyhow!("{context}: element is truncated"),
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            anyhow!("{context}: malformed element ({:?})", e.code)
        }
    }
}

fn tag(i: &[u8], endian: Endianness) -> Parsed<'_, Tag> {
    let (i, first) = parse_u32(endian)(i)?;
    if first >> 16 != 0 {
        return Ok((
            i,
            Tag {
                kind: first & 0xFFFF,
                size: (first >> 16) as usize,
                small: true,
            },
        ));
    }
    let (i, size) = parse_u32(endian)(i)?;
    Ok((
        i,
        Tag {
            kind: first,
            size: size as usize,
            small: false,
        },
    ))
}

/// Tag and payload of one subelement, padding consumed.
fn subelement(i: &[u8], endian: Endianness) -> Parsed<'_, (Tag, &[u8])> {
    let (i, t) = tag(i, endian)?;
    if t.small {
        let (i, word) = take(4usize)(i)?;
        return Ok((i, (t, &word[..t.size.min(4)])));
    }
    let (i, data) = take(t.size)(i)?;
    let (i, _) = take(padding(t.size))(i)?;
    Ok((i, (t, data)))
}

fn words(data: &[u8], endian: Endianness) -> Vec<u32> {
    data.chunks_exact(4)
        .map(|c| {
            let bytes = [c[0], c[1], c[2], c[3]];
            match endian {
                Endianness::Big => u32::from_be_bytes(bytes),
                _ => u32::from_le_bytes(bytes),
            }
        })
        .collect()
}

/// A numeric array found in the tree.
#[derive(Debug, Clone)]
struct Member {
    path: String,
    /// Array-flags and dimensions subelements, verbatim
    head: Vec<u8>,
    /// Everything after the name subelement, verbatim
    data: Vec<u8>,
}

fn walk_matrix(
    body: &[u8],
    parent: Option<&str>,
    endian: Endianness,
    out: &mut Vec<Member>,
) -> Result<()> {
    // MATLAB writes an empty field as a matrix element without a body
    if body.is_empty() {
        return Ok(());
    }
    let context = parent.unwrap_or("top-level variable");
    let (rest, (_, flags)) = subelement(body, endian).map_err(|e| malformed(context, e))?;
    let class = words(flags, endian).first().copied().unwrap_or(0) & 0xFF;
    let (rest, (_, dims)) = subelement(rest, endian).map_err(|e| malformed(context, e))?;
    let head_len = body.len() - rest.len();
    let (rest, (_, name)) = subelement(rest, endian).map_err(|e| malformed(context, e))?;
    let name = std::str::from_utf8(name).context("array name is not UTF-8")?;
    let path = parent.map_or_else(|| name.to_string(), str::to_string);

    match class {
        MX_STRUCT => {
            let elements: u64 = words(dims, endian).iter().map(|d| u64::from(*d)).product();
            if elements != 1 {
                debug!(path = %path, elements, "skipping struct array");
                return Ok(());
            }
            let (rest, (_, width)) =
                subelement(rest, endian).map_err(|e| malformed(&path, e))?;
            let width = words(width, endian).first().copied().unwrap_or(0) as usize;
            if width == 0 {
                bail!("{path}: struct field names have zero length");
            }
            let (mut rest, (_, names)) =
                subelement(rest, endian).map_err(|e| malformed(&path, e))?;
            let fields: Vec<String> = names
                .chunks(width)
                .map(|c| {
                    let end = c.iter().position(|b| *b == 0).unwrap_or(c.len());
                    String::from_utf8_lossy(&c[..end]).into_owned()
                })
                .collect();
            for field in fields {
                let (r, t) = tag(rest, endian).map_err(|e| malformed(&path, e))?;
                if t.kind != MI_MATRIX {
                    bail!("{path}.{field}: expected a matrix element, found type {}", t.kind);
                }
                let (r, child) = take(t.size)(r).map_err(|e| malformed(&path, e))?;
                walk_matrix(child, Some(&format!("{path}.{field}")), endian, out)?;
                rest = r;
            }
        }
        MX_DOUBLE..=MX_UINT64 => out.push(Member {
            path,
            head: body[..head_len].to_vec(),
            data: rest.to_vec(),
        }),
        other => debug!(path = %path, class = other, "skipping non-numeric member"),
    }
    Ok(())
}

fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut inflated = Vec::new();
    Decoder::new(data)
        .context("opening compressed element")?
        .read_to_end(&mut inflated)
        .context("inflating compressed element")?;
    Ok(inflated)
}

fn walk_file(bytes: &[u8]) -> Result<(Endianness, Vec<Member>)> {
    if bytes.len() < HEADER_LEN {
        bail!("file is shorter than a MAT-file header");
    }
    let endian = match &bytes[HEADER_LEN - 2..HEADER_LEN] {
        b"IM" => Endianness::Little,
        b"MI" => Endianness::Big,
        _ => bail!("not a level 5 MAT-file"),
    };
    let mut members = Vec::new();
    let mut rest = &bytes[HEADER_LEN..];
    while !rest.is_empty() {
        let (r, t) = tag(rest, endian).map_err(|e| malformed("variable", e))?;
        let (r, data) = take(t.size)(r).map_err(|e| malformed("variable", e))?;
        match t.kind {
            MI_COMPRESSED => {
                let inflated = inflate(data)?;
                let (body, inner) =
                    tag(&inflated, endian).map_err(|e| malformed("compressed variable", e))?;
                if inner.kind == MI_MATRIX {
                    let end = inner.size.min(body.len());
                    walk_matrix(&body[..end], None, endian, &mut members)?;
                }
                rest = r;
            }
            kind => {
                if kind == MI_MATRIX {
                    walk_matrix(data, None, endian, &mut members)?;
                } else {
                    debug!(kind, "skipping top-level element");
                }
                rest = &r[padding(t.size).min(r.len())..];
            }
        }
    }
    Ok((endian, members))
}

fn put_u32(out: &mut Vec<u8>, value: u32, endian: Endianness) {
    match endian {
        Endianness::Big => out.extend_from_slice(&value.to_be_bytes()),
        _ => out.extend_from_slice(&value.to_le_bytes()),
    }
}

/// A flat MAT-file holding every member under its dotted path.
fn encode(members: &[Member], endian: Endianness) -> Vec<u8> {
    let mut out = b"MATLAB 5.0 MAT-file, numeric members".to_vec();
    out.resize(HEADER_TEXT_LEN, b' ');
    out.extend_from_slice(&[0u8; 8]);
    match endian {
        Endianness::Big => {
            out.extend_from_slice(&0x0100u16.to_be_bytes());
            out.extend_from_slice(b"MI");
        }
        _ => {
            out.extend_from_slice(&0x0100u16.to_le_bytes());
            out.extend_from_slice(b"IM");
        }
    }
    for member in members {
        let mut name = Vec::new();
        put_u32(&mut name, MI_INT8, endian);
        put_u32(&mut name, member.path.len() as u32, endian);
        name.extend_from_slice(member.path.as_bytes());
        name.resize(name.len() + padding(member.path.len()), 0);

        let size = member.head.len() + name.len() + member.data.len();
        put_u32(&mut out, MI_MATRIX, endian);
        put_u32(&mut out, size as u32, endian);
        out.extend_from_slice(&member.head);
        out.extend_from_slice(&name);
        out.extend_from_slice(&member.data);
    }
    out
}

/// Numeric content of a MAT-file, nested members included.
pub struct MatCase {
    file: MatFile,
}

impl MatCase {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (endian, members) = walk_file(bytes)?;
        debug!(members = members.len(), "walked MAT-file");
        let file = MatFile::parse(Cursor::new(encode(&members, endian)))
            .context("decoding numeric members")?;
        Ok(Self { file })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_bytes(&bytes).with_context(|| format!("parsing MAT-file {}", path.display()))
    }

    /// Array at a dotted path such as `mpc.bus`.
    pub fn array(&self, path: &str) -> Option<&Array> {
        self.file.find_by_name(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.file.arrays().iter().map(|a| a.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(kind: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        put_u32(&mut out, kind, Endianness::Little);
        put_u32(&mut out, payload.len() as u32, Endianness::Little);
        out.extend_from_slice(payload);
        out.resize(out.len() + padding(payload.len()), 0);
        out
    }

    fn header() -> Vec<u8> {
        let mut out = vec![b' '; HEADER_TEXT_LEN];
        out.extend_from_slice(&[0u8; 8]);
        out.extend_from_slice(&0x0100u16.to_le_bytes());
        out.extend_from_slice(b"IM");
        out
    }

    fn scalar(name: &str, value: f64) -> Vec<u8> {
        let mut body = element(6, &[MX_DOUBLE as u8, 0, 0, 0, 0, 0, 0, 0]);
        body.extend(element(5, &[1, 0, 0, 0, 1, 0, 0, 0]));
        body.extend(element(MI_INT8, name.as_bytes()));
        body.extend(element(9, &value.to_le_bytes()));
        element(MI_MATRIX, &body)
    }

    #[test]
    fn struct_members_get_dotted_paths() {
        let mut body = element(6, &[MX_STRUCT as u8, 0, 0, 0, 0, 0, 0, 0]);
        body.extend(element(5, &[1, 0, 0, 0, 1, 0, 0, 0]));
        body.extend(element(MI_INT8, b"mpc"));
        // field name width as a small element
        body.extend_from_slice(&[5, 0, 4, 0, 8, 0, 0, 0]);
        let mut names = vec![0u8; 16];
        names[..7].copy_from_slice(b"baseMVA");
        names[8..12].copy_from_slice(b"note");
        body.extend(element(MI_INT8, &names));
        body.extend(scalar("", 100.0));
        // empty member
        body.extend(element(MI_MATRIX, &[]));

        let mut bytes = header();
        bytes.extend(element(MI_MATRIX, &body));
        bytes.extend(scalar("version", 2.0));

        let case = MatCase::from_bytes(&bytes).unwrap();
        let paths: Vec<&str> = case.paths().collect();
        assert_eq!(paths, vec!["mpc.baseMVA", "version"]);
        assert!(case.array("mpc.note").is_none());
    }

    #[test]
    fn non_mat_bytes_are_rejected() {
        assert!(MatCase::from_bytes(b"not a mat file").is_err());
        let mut bytes = vec![b' '; HEADER_LEN];
        bytes[HEADER_LEN - 2..].copy_from_slice(b"XX");
        assert!(MatCase::from_bytes(&bytes).is_err());
    }
}
