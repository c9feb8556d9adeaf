//! Binary serialization for occupancy trees: a text header terminated by
//! `"data\n"`, followed by either the full value-preserving body (4-byte
//! log-odds + 1-byte child mask per node, depth-first pre-order) or, behind
//! the `bytecode` feature, a compact 2-bit-per-child variant that keeps
//! only occupied/free/unknown state.

use std::io::{BufRead, BufReader, Read, Write};

use super::{validate_params, LogOdds, OccupancyMap, OccupancyParams};
use crate::error::OcTreeError;
use crate::octree::{Node, Octree, Payload, Sharing};

const MAGIC_LINE: &str = "# Octomap OcTree binary file";

/// `"OcTree"` is the only registered, constructible tree-type id in this
/// crate. `"OcTreeStamped"` and `"ColorOcTree"` are recognized (so a reader
/// doesn't treat them as malformed input) but rejected as unsupported,
/// since those payload variants are out of scope here.
pub const TREE_TYPE_ID: &str = "OcTree";

fn check_tree_type(id: &str) -> Result<(), OcTreeError> {
    match id {
        TREE_TYPE_ID => Ok(()),
        "OcTreeStamped" | "ColorOcTree" => Err(OcTreeError::MalformedInput(format!(
            "tree type '{id}' is recognized but unsupported in this crate"
        ))),
        other => Err(OcTreeError::MalformedInput(format!(
            "unrecognized tree type '{other}'"
        ))),
    }
}

fn read_header_line<R: BufRead>(r: &mut R) -> Result<String, OcTreeError> {
    let mut line = String::new();
    let n = r.read_line(&mut line)?;
    if n == 0 {
        return Err(OcTreeError::MalformedInput(
            "unexpected end of stream while reading header".to_string(),
        ));
    }
    Ok(line.trim_end().to_string())
}

/// Parses the text header, validates the tree type, and returns the
/// declared resolution. The leading `# Octomap ...` comment line and the
/// `size` line are read and discarded (`size` is informational only, per
/// the format's own documentation).
fn read_header<R: BufRead>(r: &mut R) -> Result<f32, OcTreeError> {
    let magic = read_header_line(r)?;
    if magic != MAGIC_LINE {
        return Err(OcTreeError::MalformedInput(format!(
            "expected header magic line '{MAGIC_LINE}', got '{magic}'"
        )));
    }
    let id_line = read_header_line(r)?;
    let id = id_line.strip_prefix("id ").ok_or_else(|| {
        OcTreeError::MalformedInput(format!("expected 'id <type>' line, got '{id_line}'"))
    })?;
    check_tree_type(id)?;

    let size_line = read_header_line(r)?;
    if !size_line.starts_with("size ") {
        return Err(OcTreeError::MalformedInput(format!(
            "expected 'size <n>' line, got '{size_line}'"
        )));
    }

    let res_line = read_header_line(r)?;
    let resolution: f32 = res_line
        .strip_prefix("res ")
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            OcTreeError::MalformedInput(format!("expected 'res <value>' line, got '{res_line}'"))
        })?;

    let data_line = read_header_line(r)?;
    if data_line != "data" {
        return Err(OcTreeError::MalformedInput(format!(
            "expected 'data' marker line, got '{data_line}'"
        )));
    }
    Ok(resolution)
}

fn write_header<W: Write>(w: &mut W, resolution: f32, num_leaves: usize) -> Result<(), OcTreeError> {
    writeln!(w, "{MAGIC_LINE}")?;
    writeln!(w, "id {TREE_TYPE_ID}")?;
    writeln!(w, "size {num_leaves}")?;
    writeln!(w, "res {resolution}")?;
    writeln!(w, "data")?;
    Ok(())
}

pub(super) fn write<W: Write, S: Sharing<LogOdds>>(
    map: &OccupancyMap<S>,
    w: &mut W,
) -> Result<(), OcTreeError> {
    write_header(w, map.resolution(), map.num_leaves())?;
    write_node(map.tree.root_node(), w)?;
    tracing::debug!(nodes = map.num_nodes(), "wrote octree");
    Ok(())
}

fn write_node<W: Write, T: Payload>(node: Option<&Node<T>>, w: &mut W) -> Result<(), OcTreeError> {
    let Some(node) = node else { return Ok(()) };
    node.value().write_to(w)?;
    let mut mask = 0u8;
    for i in 0..8 {
        if node.child_exists(i) {
            mask |= 1 << i;
        }
    }
    w.write_all(&[mask])?;
    for i in 0..8 {
        if let Some(child) = node.get_const_child(i) {
            write_node(Some(child), w)?;
        }
    }
    Ok(())
}

pub(super) fn read<R: Read, S: Sharing<LogOdds>>(
    r: &mut R,
    depth: u8,
) -> Result<OccupancyMap<S>, OcTreeError> {
    let mut reader = BufReader::new(r);
    let resolution = read_header(&mut reader)?;
    let root = read_node(&mut reader, depth, 0)?;
    let tree = Octree::from_parts(resolution, depth, Some(root));
    tracing::debug!(resolution, "read octree from stream");
    Ok(OccupancyMap {
        tree,
        params: OccupancyParams::default(),
    })
}

fn read_node<R: Read>(r: &mut R, depth: u8, depth_from_root: u8) -> Result<Node<LogOdds>, OcTreeError> {
    if depth_from_root > depth {
        return Err(OcTreeError::MalformedInput(
            "recursion depth exceeded tree depth".to_string(),
        ));
    }
    let value = LogOdds::read_from(r)?;
    let mut mask_buf = [0u8; 1];
    r.read_exact(&mut mask_buf)?;
    let mask = mask_buf[0];

    let mut node = Node::new_leaf(value);
    for i in 0..8 {
        if mask & (1 << i) != 0 {
            let child = read_node(r, depth, depth_from_root + 1)?;
            node.set_child(i, child);
        }
    }
    Ok(node)
}

#[cfg(feature = "bytecode")]
fn leaf_code(node: &Node<LogOdds>, threshold: f32) -> u16 {
    if node.has_children() {
        3
    } else if node.value().value() >= threshold {
        2
    } else {
        1
    }
}

#[cfg(feature = "bytecode")]
pub(super) fn write_binary<W: Write, S: Sharing<LogOdds>>(
    map: &OccupancyMap<S>,
    w: &mut W,
) -> Result<(), OcTreeError> {
    write_header(w, map.resolution(), map.num_leaves())?;
    if let Some(root) = map.tree.root_node() {
        write_binary_node(root, map.params().occupancy_threshold, w)?;
    }
    Ok(())
}

#[cfg(feature = "bytecode")]
fn write_binary_node<W: Write>(
    node: &Node<LogOdds>,
    threshold: f32,
    w: &mut W,
) -> Result<(), OcTreeError> {
    let mut packed: u16 = 0;
    for i in 0..8 {
        let code = match node.get_const_child(i) {
            None => 0u16,
            Some(child) => leaf_code(child, threshold),
        };
        packed |= code << (i * 2);
    }
    w.write_all(&packed.to_ne_bytes())?;
    for i in 0..8 {
        if let Some(child) = node.get_const_child(i) {
            if child.has_children() {
                write_binary_node(child, threshold, w)?;
            }
        }
    }
    Ok(())
}

#[cfg(feature = "bytecode")]
pub(super) fn read_binary<R: Read, S: Sharing<LogOdds>>(
    r: &mut R,
    depth: u8,
) -> Result<OccupancyMap<S>, OcTreeError> {
    let mut reader = BufReader::new(r);
    let resolution = read_header(&mut reader)?;
    let params = OccupancyParams::default();
    validate_params(&params)?;
    let root = read_binary_node(&mut reader, &params, depth, 0)?;
    let tree = Octree::from_parts(resolution, depth, root);
    tracing::debug!(resolution, "read binary octree from stream");
    Ok(OccupancyMap { tree, params })
}

#[cfg(feature = "bytecode")]
fn read_binary_node<R: Read>(
    r: &mut R,
    params: &OccupancyParams,
    depth: u8,
    depth_from_root: u8,
) -> Result<Option<Node<LogOdds>>, OcTreeError> {
    if depth_from_root > depth {
        return Err(OcTreeError::MalformedInput(
            "recursion depth exceeded tree depth".to_string(),
        ));
    }
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    let packed = u16::from_ne_bytes(buf);

    let mut node = Node::new_leaf(LogOdds::default());
    let mut values = Vec::new();
    for i in 0..8 {
        let code = (packed >> (i * 2)) & 0b11;
        match code {
            0 => {}
            1 => {
                let child = Node::new_leaf(LogOdds::new(params.clamping_min));
                values.push(*child.value());
                node.set_child(i, child);
            }
            2 => {
                let child = Node::new_leaf(LogOdds::new(params.clamping_max));
                values.push(*child.value());
                node.set_child(i, child);
            }
            3 => {
                if let Some(child) = read_binary_node(r, params, depth, depth_from_root + 1)? {
                    values.push(*child.value());
                    node.set_child(i, child);
                }
            }
            _ => unreachable!("2-bit code always in 0..=3"),
        }
    }
    if !values.is_empty() {
        let refs: Vec<&LogOdds> = values.iter().collect();
        node.set_value(LogOdds::aggregate(&refs));
    }
    Ok(Some(node))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::octree::CowDisabled;
    use crate::spatial::math::V3c;

    #[test]
    fn test_write_read_round_trip() {
        let mut map = OccupancyMap::<CowDisabled>::with_resolution(0.1, 6).unwrap();
        map.update_node(V3c::new(0.05, 0.05, 0.05), true);
        map.update_node(V3c::new(-0.15, 0.25, 0.05), false);

        let mut buf = Vec::new();
        map.write(&mut buf).unwrap();
        let restored: OccupancyMap<CowDisabled> =
            OccupancyMap::read(&mut buf.as_slice(), map.depth()).unwrap();

        let a: Vec<_> = map.leaves().collect();
        let b: Vec<_> = restored.leaves().collect();
        assert_eq!(a.len(), b.len());
        for ((key_a, val_a), (key_b, val_b)) in a.iter().zip(b.iter()) {
            assert_eq!(key_a, key_b);
            assert_eq!(val_a, val_b);
        }
    }

    #[test]
    fn test_read_rejects_unknown_tree_type() {
        let bad = b"# Octomap OcTree binary file\nid NotARealTree\nsize 0\nres 0.1\ndata\n";
        let result: Result<OccupancyMap<CowDisabled>, _> =
            OccupancyMap::read(&mut bad.as_slice(), 16);
        assert!(result.is_err());
    }

    #[test]
    fn test_read_recognizes_but_rejects_color_octree() {
        let bad = b"# Octomap OcTree binary file\nid ColorOcTree\nsize 0\nres 0.1\ndata\n";
        let result: Result<OccupancyMap<CowDisabled>, _> =
            OccupancyMap::read(&mut bad.as_slice(), 16);
        match result {
            Err(OcTreeError::MalformedInput(msg)) => assert!(msg.contains("unsupported")),
            _ => panic!("expected MalformedInput"),
        }
    }

    #[test]
    #[cfg(feature = "bytecode")]
    fn test_binary_round_trip_preserves_occupancy() {
        let mut map = OccupancyMap::<CowDisabled>::with_resolution(0.1, 6).unwrap();
        let occ = V3c::new(0.05, 0.05, 0.05);
        let free = V3c::new(-0.25, 0.05, 0.05);
        map.update_node(occ, true);
        map.update_node(free, false);

        let mut buf = Vec::new();
        map.write_binary(&mut buf).unwrap();
        let restored: OccupancyMap<CowDisabled> =
            OccupancyMap::read_binary(&mut buf.as_slice(), map.depth()).unwrap();

        assert_eq!(restored.is_occupied(occ), Some(true));
        assert_eq!(restored.is_occupied(free), Some(false));
    }
}
