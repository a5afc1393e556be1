//! Inputs shared by the benchmarks.

#[derive(Debug, Copy, Clone)]
pub struct TestCase {
    name: &'static str,
    group: TestGroup,
    file: TestFile,
}

impl TestCase {
    pub fn new(name: &'static str, group: TestGroup, file: TestFile) -> Self {
        Self { name, group, file }
    }

    pub fn small(name: &'static str, file: TestFile) -> Self {
        Self::new(name, TestGroup::Small, file)
    }

    pub fn normal(name: &'static str, file: TestFile) -> Self {
        Self::new(name, TestGroup::Normal, file)
    }

    pub fn large(name: &'static str, file: TestFile) -> Self {
        Self::new(name, TestGroup::Large, file)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn group(&self) -> TestGroup {
        self.group
    }

    pub fn file(&self) -> &TestFile {
        &self.file
    }
}

/// A named request captured on disk.
#[derive(Debug, Copy, Clone)]
pub struct TestFile {
    file_name: &'static str,
    content: &'static str,
}

impl TestFile {
    pub const fn new(file_name: &'static str, content: &'static str) -> Self {
        Self { file_name, content }
    }

    pub fn content(&self) -> &'static str {
        self.content
    }

    pub fn file_name(&self) -> &'static str {
        self.file_name
    }
}

#[derive(Clone, Copy, Debug)]
pub enum TestGroup {
    Small,
    Normal,
    Large,
}

/// Sizes of the text messages the frame benchmarks relay.
#[derive(Clone, Copy, Debug)]
pub struct MessageSize {
    pub group: TestGroup,
    pub len: usize,
}

impl MessageSize {
    pub const ALL: [MessageSize; 3] = [
        MessageSize { group: TestGroup::Small, len: 16 },
        MessageSize { group: TestGroup::Normal, len: 1024 },
        MessageSize { group: TestGroup::Large, len: 60 * 1024 },
    ];

    /// A printable payload of `len` bytes.
    pub fn text(&self) -> String {
        "relay ".chars().cycle().take(self.len).collect()
    }
}
