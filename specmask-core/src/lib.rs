macro_rules! impl_blob_serde {
    ($name:ident { $( $field:ident : $ty:ty ),* $(,)? }) => {
        paste::paste! {
            #[derive(Debug, Clone)]
            pub struct $name {
                $( pub $field : $ty ),*
            }

            #[derive(serde::Serialize, serde::Deserialize)]
            struct [<$name Blob>] {
                $( $field : $ty ),*
            }

            impl serde::Serialize for $name {
                fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
                where
                    S: serde::Serializer,
                {
                    use base64::engine::general_purpose::STANDARD as BASE64;
                    use base64::Engine;
                    use flate2::{write::GzEncoder, Compression};
                    use std::io::Write;

                    let blob = [<$name Blob>] {
                        $( $field: self.$field.clone() ),*
                    };

                    let encoded = bincode::serialize(&blob)
                        .map_err(|e| serde::ser::Error::custom(format!("Bincode serialization failed: {}", e)))?;

                    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                    encoder
                        .write_all(&encoded)
                        .map_err(|e| serde::ser::Error::custom(format!("Compression failed: {}", e)))?;
                    let compressed = encoder
                        .finish()
                        .map_err(|e| serde::ser::Error::custom(format!("Compression finish failed: {}", e)))?;

                    serializer.serialize_str(&BASE64.encode(&compressed))
                }
            }

            impl<'de> serde::Deserialize<'de> for $name {
                fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
                where
                    D: serde::Deserializer<'de>,
                {
                    use base64::engine::general_purpose::STANDARD as BASE64;
                    use base64::Engine;
                    use flate2::read::GzDecoder;
                    use std::fmt;
                    use std::io::Read;

                    struct VisitorImpl;

                    impl<'de> serde::de::Visitor<'de> for VisitorImpl {
                        type Value = $name;

                        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                            write!(f, "a base64 encoded, compressed, bincode serialized {}", stringify!($name))
                        }

                        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
                        where
                            E: serde::de::Error,
                        {
                            let compressed = BASE64.decode(v)
                                .map_err(|e| E::custom(format!("Base64 decode failed: {}", e)))?;

                            let mut decoder = GzDecoder::new(&compressed[..]);
                            let mut decompressed = Vec::new();
                            decoder
                                .read_to_end(&mut decompressed)
                                .map_err(|e| E::custom(format!("Decompression failed: {}", e)))?;

                            let blob: [<$name Blob>] = bincode::deserialize(&decompressed)
                                .map_err(|e| E::custom(format!("Bincode deserialization failed: {}", e)))?;

                            Ok($name {
                                $( $field: blob.$field ),*
                            })
                        }
                    }

                    deserializer.deserialize_str(VisitorImpl)
                }
            }
        }
    };
}

pub mod config;
pub mod diagnostics;
pub mod generate;
pub mod model;
pub mod normalize;
pub mod optimizer;
pub mod projection;
pub mod sample;
pub mod spectral;

pub use config::SearchSettings;
pub use diagnostics::{DiagnosticsSink, IterationRecord, JsonlSink, NullSink};
pub use model::{FrozenModel, Mlp, ModelSnapshot};
pub use optimizer::{MaskOptimizer, MaskSolution};
pub use sample::Sample;
