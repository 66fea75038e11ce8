/// An opaque test case fed to the target. No internal structure is assumed.
pub trait Input: Clone + Send + Sync + std::fmt::Debug + 'static {
    fn as_bytes(&self) -> &[u8];
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool;

    /// Lowercase hex MD5 of the raw bytes, used to tag reproducers.
    fn digest_hex(&self) -> String {
        format!("{:x}", md5::compute(self.as_bytes()))
    }
}

impl Input for Vec<u8> {
    fn as_bytes(&self) -> &[u8] {
        self.as_slice()
    }
    fn len(&self) -> usize {
        self.len()
    }
    fn is_empty(&self) -> bool {
        self.is_empty()
    }
}
