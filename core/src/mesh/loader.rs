//! Model file parsing: STL (ASCII and binary), OBJ and ASCII PLY.
//!
//! Every format goes through `MeshBuilder`, so coincident vertices are welded
//! and shared edges are found regardless of how the file lists them.

use super::{MeshBuilder, MeshModel, ModelFormat};
use crate::error::{LoadError, LoadResult};
use crate::geometry::Point3;
use tracing::debug;

/// Turns raw file bytes into a model handle.
pub trait ModelLoader: Send + Sync {
    fn load(&self, name: &str, bytes: &[u8], format: ModelFormat) -> LoadResult<MeshModel>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MeshLoader;

impl ModelLoader for MeshLoader {
    fn load(&self, name: &str, bytes: &[u8], format: ModelFormat) -> LoadResult<MeshModel> {
        if bytes.is_empty() {
            return Err(corrupt("file is empty"));
        }
        let builder = match format {
            ModelFormat::Stl => parse_stl(bytes)?,
            ModelFormat::Obj => parse_obj(text(bytes)?)?,
            ModelFormat::Ply => parse_ply(bytes)?,
            ModelFormat::Step => {
                return Err(LoadError::UnsupportedFormat(
                    "STEP files need a B-Rep kernel; export the part as STL, OBJ or PLY".into(),
                ))
            }
        };
        if builder.face_count() == 0 {
            return Err(corrupt("model has no faces"));
        }
        debug!(
            "Loaded {} ({}): {} vertices, {} faces",
            name,
            format,
            builder.vertex_count(),
            builder.face_count()
        );
        Ok(builder.build(name, format))
    }
}

fn corrupt(message: impl Into<String>) -> LoadError {
    LoadError::CorruptModel(message.into())
}

fn text(bytes: &[u8]) -> LoadResult<&str> {
    std::str::from_utf8(bytes).map_err(|_| corrupt("file is not valid UTF-8 text"))
}

fn parse_f64(token: Option<&str>, line: usize) -> LoadResult<f64> {
    let token = token.ok_or_else(|| corrupt(format!("line {line}: missing coordinate")))?;
    token
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| corrupt(format!("line {line}: bad number '{token}'")))
}

fn parse_point<'a>(tokens: &mut impl Iterator<Item = &'a str>, line: usize) -> LoadResult<Point3> {
    Ok(Point3::new(
        parse_f64(tokens.next(), line)?,
        parse_f64(tokens.next(), line)?,
        parse_f64(tokens.next(), line)?,
    ))
}

// ---------------------------------------------------------------- STL

const STL_HEADER: usize = 80;
const STL_RECORD: usize = 50;

fn parse_stl(bytes: &[u8]) -> LoadResult<MeshBuilder> {
    if is_binary_stl(bytes) {
        return parse_binary_stl(bytes);
    }
    let trimmed = bytes.iter().skip_while(|b| b.is_ascii_whitespace());
    if trimmed.take(5).copied().eq(b"solid".iter().copied()) {
        return parse_ascii_stl(text(bytes)?);
    }
    Err(corrupt("neither ASCII nor binary STL"))
}

/// Binary STL: 80-byte header, u32 triangle count, 50 bytes per triangle.
/// Some exporters write "solid" into the binary header, so the size check wins.
fn is_binary_stl(bytes: &[u8]) -> bool {
    if bytes.len() < STL_HEADER + 4 {
        return false;
    }
    let mut count = [0u8; 4];
    count.copy_from_slice(&bytes[STL_HEADER..STL_HEADER + 4]);
    let n = u32::from_le_bytes(count) as usize;
    n.checked_mul(STL_RECORD)
        .and_then(|body| body.checked_add(STL_HEADER + 4))
        == Some(bytes.len())
}

fn parse_binary_stl(bytes: &[u8]) -> LoadResult<MeshBuilder> {
    let mut builder = MeshBuilder::new();
    for record in bytes[STL_HEADER + 4..].chunks_exact(STL_RECORD) {
        // 12 bytes normal, 3x12 bytes vertices, 2 bytes attribute
        let mut corners = [Point3::origin(); 3];
        for (k, corner) in corners.iter_mut().enumerate() {
            let base = 12 + k * 12;
            let coord = |o: usize| {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(&record[base + o..base + o + 4]);
                f32::from_le_bytes(raw) as f64
            };
            *corner = Point3::new(coord(0), coord(4), coord(8));
            if !corner.coords.iter().all(|c| c.is_finite()) {
                return Err(corrupt("non-finite coordinate in binary STL"));
            }
        }
        builder.add_triangle(&corners);
    }
    Ok(builder)
}

fn parse_ascii_stl(src: &str) -> LoadResult<MeshBuilder> {
    let mut builder = MeshBuilder::new();
    let mut facet: Vec<u32> = Vec::new();
    let mut in_loop = false;

    for (i, raw) in src.lines().enumerate() {
        let line = i + 1;
        let mut tokens = raw.split_whitespace();
        match tokens.next() {
            Some("outer") => {
                facet.clear();
                in_loop = true;
            }
            Some("vertex") if in_loop => {
                let p = parse_point(&mut tokens, line)?;
                facet.push(builder.add_vertex(p));
            }
            Some("vertex") => return Err(corrupt(format!("line {line}: vertex outside a loop"))),
            Some("endloop") => {
                if facet.len() < 3 {
                    return Err(corrupt(format!("line {line}: facet with {} vertices", facet.len())));
                }
                builder.add_polygon(&facet);
                in_loop = false;
            }
            _ => {}
        }
    }
    if in_loop {
        return Err(corrupt("unterminated facet"));
    }
    Ok(builder)
}

// ---------------------------------------------------------------- OBJ

fn parse_obj(src: &str) -> LoadResult<MeshBuilder> {
    let mut positions: Vec<Point3> = Vec::new();
    let mut polygons: Vec<Vec<usize>> = Vec::new();

    for (i, raw) in src.lines().enumerate() {
        let line = i + 1;
        let mut tokens = raw.split_whitespace();
        match tokens.next() {
            Some("v") => positions.push(parse_point(&mut tokens, line)?),
            Some("f") => {
                let mut polygon = Vec::new();
                for token in tokens {
                    polygon.push(resolve_obj_index(token, positions.len(), line)?);
                }
                if polygon.len() < 3 {
                    return Err(corrupt(format!("line {line}: face with fewer than 3 vertices")));
                }
                polygons.push(polygon);
            }
            _ => {}
        }
    }

    let mut builder = MeshBuilder::new();
    let remap: Vec<u32> = positions.into_iter().map(|p| builder.add_vertex(p)).collect();
    for polygon in polygons {
        let ids: Vec<u32> = polygon.into_iter().map(|i| remap[i]).collect();
        builder.add_polygon(&ids);
    }
    Ok(builder)
}

/// `v`, `v/vt`, `v//vn` or `v/vt/vn`; 1-based, negative counts back from the
/// vertices seen so far.
fn resolve_obj_index(token: &str, seen: usize, line: usize) -> LoadResult<usize> {
    let head = token.split('/').next().unwrap_or(token);
    let raw: i64 = head
        .parse()
        .map_err(|_| corrupt(format!("line {line}: bad face index '{token}'")))?;
    let resolved = match raw {
        0 => None,
        r if r > 0 => Some(r as usize - 1),
        r => (seen as i64 + r).try_into().ok(),
    };
    resolved
        .filter(|&i| i < seen)
        .ok_or_else(|| corrupt(format!("line {line}: face index {raw} out of range")))
}

// ---------------------------------------------------------------- PLY

struct PlyElement {
    name: String,
    count: usize,
    properties: Vec<String>,
}

fn parse_ply(bytes: &[u8]) -> LoadResult<MeshBuilder> {
    let src = text(bytes).map_err(|_| {
        LoadError::UnsupportedFormat("binary PLY; only ASCII PLY is supported".into())
    })?;
    let mut lines = src.lines().enumerate();

    if lines.next().map(|(_, l)| l.trim()) != Some("ply") {
        return Err(corrupt("missing 'ply' magic"));
    }

    let mut elements: Vec<PlyElement> = Vec::new();
    loop {
        let Some((i, raw)) = lines.next() else {
            return Err(corrupt("unterminated PLY header"));
        };
        let line = i + 1;
        let mut tokens = raw.split_whitespace();
        match tokens.next() {
            Some("format") => {
                if tokens.next() != Some("ascii") {
                    return Err(LoadError::UnsupportedFormat(
                        "binary PLY; only ASCII PLY is supported".into(),
                    ));
                }
            }
            Some("element") => {
                let name = tokens.next().unwrap_or_default().to_owned();
                let count = tokens
                    .next()
                    .and_then(|c| c.parse().ok())
                    .ok_or_else(|| corrupt(format!("line {line}: bad element count")))?;
                elements.push(PlyElement {
                    name,
                    count,
                    properties: Vec::new(),
                });
            }
            Some("property") => {
                let element = elements
                    .last_mut()
                    .ok_or_else(|| corrupt(format!("line {line}: property before element")))?;
                // last token is the property name for scalars and lists alike
                if let Some(name) = raw.split_whitespace().last() {
                    element.properties.push(name.to_owned());
                }
            }
            Some("end_header") => break,
            _ => {}
        }
    }

    let mut builder = MeshBuilder::new();
    let mut vertex_ids: Vec<u32> = Vec::new();

    for element in &elements {
        for _ in 0..element.count {
            let Some((i, raw)) = lines.next() else {
                return Err(corrupt(format!("missing {} data", element.name)));
            };
            let line = i + 1;
            let values: Vec<&str> = raw.split_whitespace().collect();
            match element.name.as_str() {
                "vertex" => {
                    let coord = |axis: &str| {
                        let at = element.properties.iter().position(|p| p == axis);
                        parse_f64(at.and_then(|a| values.get(a).copied()), line)
                    };
                    let p = Point3::new(coord("x")?, coord("y")?, coord("z")?);
                    vertex_ids.push(builder.add_vertex(p));
                }
                "face" => {
                    let n: usize = values
                        .first()
                        .and_then(|v| v.parse().ok())
                        .ok_or_else(|| corrupt(format!("line {line}: bad face")))?;
                    if n < 3 || n > values.len() - 1 {
                        return Err(corrupt(format!(
                            "line {line}: face declares {n} vertices but lists {}",
                            values.len() - 1
                        )));
                    }
                    let mut polygon = Vec::with_capacity(n);
                    for v in values.iter().skip(1).take(n) {
                        let idx: usize = v
                            .parse()
                            .map_err(|_| corrupt(format!("line {line}: bad face index '{v}'")))?;
                        let id = vertex_ids
                            .get(idx)
                            .ok_or_else(|| corrupt(format!("line {line}: face index {idx} out of range")))?;
                        polygon.push(*id);
                    }
                    builder.add_polygon(&polygon);
                }
                _ => {}
            }
        }
    }
    Ok(builder)
}
