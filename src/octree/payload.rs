use std::io::{Read, Write};

/// The value a tree node carries. `LogOdds` (in [`crate::occupancy`]) is the
/// one concrete payload this crate ships; a counting or timestamped payload
/// would implement this trait without touching the tree base at all.
pub trait Payload: Default + Clone + PartialEq {
    /// Inner-node value derived from its *existing* children (some slots may
    /// be empty). Called bottom-up after every mutating descent; cheap and
    /// unconditional, distinct from the structural collapse [`super::Node::prune`] performs.
    fn aggregate(children: &[&Self]) -> Self;

    /// Value installed into each of the 8 fresh children created by
    /// `Node::expand`. Identity for occupancy; a counting payload would
    /// divide by 8 here instead.
    fn split_on_expand(&self) -> Self;

    fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()>;
    fn read_from<R: Read>(r: &mut R) -> std::io::Result<Self>
    where
        Self: Sized;
}
