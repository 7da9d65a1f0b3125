//! # Utility Functions and Types
//!
//! This module provides common utility functions and types used throughout the asfio library.
//! It includes implementations for:
//!
//! - Bit-level decoding of packed flag bytes
//! - Bounds-checked little-endian byte reading
//!
//! ## Bit Operations
//!
//! ```rust
//! use asfio::utils::BitReader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let data = vec![0b10110011u8];
//! let mut reader = BitReader::new(&data);
//!
//! // Read specific number of bits
//! let value = reader.read_bits(3)?; // Reads first 3 bits (101)
//! assert_eq!(value, 0b101);
//! # Ok(())
//! # }
//! ```
//!
//! ## Byte Reading
//!
//! ```rust
//! use asfio::utils::ByteReader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let data = [0x30, 0x26, 0xb2, 0x75];
//! let mut reader = ByteReader::new(&data);
//! assert_eq!(reader.read_u32_le()?, 0x75b22630);
//! # Ok(())
//! # }
//! ```

/// Bit manipulation and bitstream reading utilities
pub mod bits;

/// Byte cursor for little-endian binary formats
pub mod byte_reader;

// Re-export commonly used types
pub use self::bits::BitReader;
pub use self::byte_reader::ByteReader;
