//! This module acts as a shim between serde_json and simd-json to allow for higher performance JSON
//! parsing on SIMD-capable architectures

/// Check that the buffer holds exactly one well-formed JSON document
pub fn validate(buffer: &[u8]) -> Result<(), std::io::Error> {
    #[cfg(feature = "simd")]
    {
        // simd-json parses in place, so it needs a scratch copy
        let mut scratch = buffer.to_vec();
        simd_json::to_owned_value(&mut scratch)
            .map(|_| ())
            .map_err(std::io::Error::other)
    }

    #[cfg(not(feature = "simd"))]
    {
        serde_json::from_slice::<serde::de::IgnoredAny>(buffer)
            .map(|_| ())
            .map_err(|e| e.into())
    }
}

/// Turn the serializable value into an owned String
pub fn to_string<S: serde::Serialize>(value: &S) -> Result<String, serde_json::error::Error> {
    serde_json::to_string::<S>(value)
}
