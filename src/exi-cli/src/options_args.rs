//! Maps `clap` flags onto [`exi::ExiOptions`], the same way
//! `pmikstacki-bsharp/src/bsharp_cli` maps its flags onto the compiler's
//! options struct (§6 "CLI surface").

use clap::{Args, ValueEnum};
use exi::{AlignmentKind, ExiOptions, PreserveSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AlignmentArg {
    Bit,
    Byte,
    PreCompression,
    Compression,
}

impl From<AlignmentArg> for AlignmentKind {
    fn from(value: AlignmentArg) -> Self {
        match value {
            AlignmentArg::Bit => AlignmentKind::BitPacked,
            AlignmentArg::Byte => AlignmentKind::ByteAligned,
            AlignmentArg::PreCompression => AlignmentKind::PreCompression,
            AlignmentArg::Compression => AlignmentKind::Compression,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PreserveArg {
    Comments,
    Dtds,
    LexicalValues,
    Pis,
    Prefixes,
}

impl From<PreserveArg> for PreserveSet {
    fn from(value: PreserveArg) -> Self {
        match value {
            PreserveArg::Comments => PreserveSet::COMMENTS,
            PreserveArg::Dtds => PreserveSet::DTDS,
            PreserveArg::LexicalValues => PreserveSet::LEXICAL_VALUES,
            PreserveArg::Pis => PreserveSet::PIS,
            PreserveArg::Prefixes => PreserveSet::PREFIXES,
        }
    }
}

/// Flags shared by `decode` and `encode` (§6): alignment, strict mode,
/// preserve set, compression, and value-partition capacity.
#[derive(Debug, Args)]
pub struct OptionsArgs {
    /// Stream alignment (defaults to bit-packed if unset)
    #[arg(long, value_enum)]
    pub alignment: Option<AlignmentArg>,

    /// Enable strict mode (forbids NS/CM/PI/DT/ER/SC productions)
    #[arg(long, default_value_t = false)]
    pub strict: bool,

    /// Enable a self-contained region grammar
    #[arg(long, default_value_t = false)]
    pub self_contained: bool,

    /// Enable compression framing (forces pre-compression alignment)
    #[arg(long, default_value_t = false)]
    pub compression: bool,

    /// Lexical features to preserve across the round-trip; repeatable
    #[arg(long = "preserve", value_enum, num_args = 0..)]
    pub preserve: Vec<PreserveArg>,

    /// Bound the global value partition to N entries (0 disables it)
    #[arg(long)]
    pub value_partition_capacity: Option<u64>,
}

impl OptionsArgs {
    pub fn to_options(&self) -> ExiOptions {
        let mut preserve = PreserveSet::NONE;
        for flag in &self.preserve {
            preserve.set((*flag).into());
        }

        ExiOptions {
            alignment: self.alignment.map(AlignmentKind::from),
            compression: self.compression,
            strict: self.strict,
            self_contained: self.self_contained,
            preserve,
            value_partition_capacity: self.value_partition_capacity,
            ..Default::default()
        }
    }
}
