//! The corpus of classes a patch run operates on.
//!
//! A [`Corpus`] is loaded once (usually from a listing via [`Corpus::from_path`]), mutated by
//! zero or more patches and written back once. Methods are addressed by a [`MethodHandle`], a
//! stable pair of class and method positions; handles stay valid for the whole run because
//! patching never adds or removes classes or methods.

use std::{collections::HashMap, fmt, fs, path::Path};

use memmap2::Mmap;

use crate::{
    model::{
        descriptor::TypeDescriptor,
        listing,
        method::{AccessFlags, Method},
    },
    Error, Result,
};

/// A class and its methods.
#[derive(Debug, Clone, PartialEq)]
pub struct Class {
    name: TypeDescriptor,
    flags: AccessFlags,
    superclass: Option<TypeDescriptor>,
    methods: Vec<Method>,
}

impl Class {
    /// Creates an empty class.
    #[must_use]
    pub fn new(name: TypeDescriptor, flags: AccessFlags, superclass: Option<TypeDescriptor>) -> Self {
        Class {
            name,
            flags,
            superclass,
            methods: Vec::new(),
        }
    }

    /// The class descriptor, e.g. `Lcom/example/Foo;`.
    #[must_use]
    pub fn name(&self) -> &TypeDescriptor {
        &self.name
    }

    /// Access flags.
    #[must_use]
    pub fn flags(&self) -> AccessFlags {
        self.flags
    }

    /// The superclass descriptor, if declared.
    #[must_use]
    pub fn superclass(&self) -> Option<&TypeDescriptor> {
        self.superclass.as_ref()
    }

    /// All methods in declaration order.
    #[must_use]
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    /// Appends a method.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the method belongs to another class or a method
    /// with the same name and prototype already exists.
    pub fn add_method(&mut self, method: Method) -> Result<()> {
        if method.id().owner != self.name {
            return Err(malformed_error!(
                "Method {} does not belong to {}",
                method.id(),
                self.name
            ));
        }
        if self.methods.iter().any(|m| m.id() == method.id()) {
            return Err(malformed_error!("Duplicate method {}", method.id()));
        }
        self.methods.push(method);
        Ok(())
    }

    /// Positions of every method named `name` (all overloads), in declaration order.
    #[must_use]
    pub fn method_indices(&self, name: &str) -> Vec<usize> {
        self.methods
            .iter()
            .enumerate()
            .filter(|(_, m)| m.name() == name)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Stable address of a method inside a [`Corpus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodHandle {
    /// Position of the declaring class
    pub class: usize,
    /// Position of the method inside its class
    pub method: usize,
}

impl fmt::Display for MethodHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.class, self.method)
    }
}

/// The set of classes under patch.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    classes: Vec<Class>,
    index: HashMap<String, usize>,
}

impl PartialEq for Corpus {
    fn eq(&self, other: &Self) -> bool {
        self.classes == other.classes
    }
}

impl Corpus {
    /// Creates an empty corpus.
    #[must_use]
    pub fn new() -> Self {
        Corpus::default()
    }

    /// Parses a corpus from listing text.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ListingSyntax`] with the offending line on parse failures and
    /// [`crate::Error::CorpusIntegrity`] if a method body is inconsistent.
    pub fn from_listing(text: &str) -> Result<Self> {
        listing::parse(text)
    }

    /// Loads a corpus from a listing file on disk.
    ///
    /// The file is memory-mapped and parsed in place.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if the file can not be read, a
    /// [`crate::Error::Malformed`] error if it is not UTF-8, and any error of
    /// [`Corpus::from_listing`].
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = fs::File::open(path.as_ref())?;
        if file.metadata()?.len() == 0 {
            return Ok(Corpus::new());
        }

        // Safety: the mapping is read-only and dropped before this function returns.
        let mmap = unsafe { Mmap::map(&file)? };
        let text = std::str::from_utf8(&mmap)
            .map_err(|e| malformed_error!("Listing is not valid UTF-8 - {}", e))?;
        listing::parse(text)
    }

    /// Renders the corpus as listing text. Parsing the result yields an equal corpus.
    #[must_use]
    pub fn to_listing(&self) -> String {
        listing::write(self)
    }

    /// Writes the listing to a file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if the file can not be written.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_listing())?;
        Ok(())
    }

    /// Adds a class.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if a class with the same name exists.
    pub fn add_class(&mut self, class: Class) -> Result<()> {
        let name = class.name().to_string();
        if self.index.contains_key(&name) {
            return Err(malformed_error!("Duplicate class {}", name));
        }
        self.index.insert(name, self.classes.len());
        self.classes.push(class);
        Ok(())
    }

    /// All classes in load order.
    #[must_use]
    pub fn classes(&self) -> &[Class] {
        &self.classes
    }

    /// Looks up a class by descriptor.
    #[must_use]
    pub fn class(&self, name: &str) -> Option<&Class> {
        self.class_index(name).map(|i| &self.classes[i])
    }

    /// Position of a class by descriptor.
    #[must_use]
    pub fn class_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// The method at `handle`.
    #[must_use]
    pub fn method(&self, handle: MethodHandle) -> Option<&Method> {
        self.classes
            .get(handle.class)
            .and_then(|c| c.methods.get(handle.method))
    }

    /// Mutable access to the method at `handle`.
    pub fn method_mut(&mut self, handle: MethodHandle) -> Option<&mut Method> {
        self.classes
            .get_mut(handle.class)
            .and_then(|c| c.methods.get_mut(handle.method))
    }

    /// The method at `handle`, or an error naming the handle.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::Error::Malformed`] error for a handle from another corpus.
    pub fn get_method_mut(&mut self, handle: MethodHandle) -> Result<&mut Method> {
        self.method_mut(handle)
            .ok_or_else(|| malformed_error!("Invalid method handle {}", handle))
    }

    /// Every method with its handle and declaring class, in corpus order.
    pub fn methods(&self) -> impl Iterator<Item = (MethodHandle, &Class, &Method)> {
        self.classes.iter().enumerate().flat_map(|(ci, class)| {
            class.methods.iter().enumerate().map(move |(mi, method)| {
                (
                    MethodHandle {
                        class: ci,
                        method: mi,
                    },
                    class,
                    method,
                )
            })
        })
    }

    /// Total number of methods.
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.classes.iter().map(|c| c.methods.len()).sum()
    }

    /// Handles of every overload named `name` on `owner`.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::ClassNotFound`] if `owner` is not in the corpus
    /// - [`crate::Error::MethodNotFound`] if no method of that name exists
    pub fn find_methods(&self, owner: &str, name: &str) -> Result<Vec<MethodHandle>> {
        let class_index = self.class_index(owner).ok_or_else(|| Error::ClassNotFound {
            class: owner.to_string(),
        })?;
        let handles: Vec<MethodHandle> = self.classes[class_index]
            .method_indices(name)
            .into_iter()
            .map(|method| MethodHandle {
                class: class_index,
                method,
            })
            .collect();
        if handles.is_empty() {
            return Err(Error::MethodNotFound {
                class: owner.to_string(),
                method: name.to_string(),
            });
        }
        Ok(handles)
    }

    /// Validates and freezes every method. After this, all edits fail with
    /// [`crate::Error::MethodFinalized`].
    ///
    /// # Errors
    ///
    /// Returns the first [`crate::Error::CorpusIntegrity`] found; methods validated before it
    /// stay finalized.
    pub fn finalize(&mut self) -> Result<()> {
        for class in &mut self.classes {
            for method in &mut class.methods {
                if !method.is_finalized() {
                    method.finalize()?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{ads_corpus, ADS_CLIENT};

    #[test]
    fn test_find_methods_overloads() -> Result<()> {
        let corpus = ads_corpus()?;
        let handles = corpus.find_methods(ADS_CLIENT, "requestAd")?;
        assert_eq!(handles.len(), 2);
        for handle in handles {
            assert_eq!(corpus.method(handle).map(Method::name), Some("requestAd"));
        }
        Ok(())
    }

    #[test]
    fn test_find_methods_errors() -> Result<()> {
        let corpus = ads_corpus()?;
        assert!(matches!(
            corpus.find_methods("Lcom/missing/Nope;", "x"),
            Err(Error::ClassNotFound { .. })
        ));
        assert!(matches!(
            corpus.find_methods(ADS_CLIENT, "nope"),
            Err(Error::MethodNotFound { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_duplicate_class_rejected() -> Result<()> {
        let mut corpus = ads_corpus()?;
        let class = corpus.classes()[0].clone();
        assert!(corpus.add_class(class).is_err());
        Ok(())
    }

    #[test]
    fn test_finalize() -> Result<()> {
        let mut corpus = ads_corpus()?;
        corpus.finalize()?;
        assert!(corpus.methods().all(|(_, _, m)| m.is_finalized()));
        Ok(())
    }

    #[test]
    fn test_file_roundtrip() -> Result<()> {
        let corpus = ads_corpus()?;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("ads.smali");
        corpus.write_to(&path)?;
        assert_eq!(Corpus::from_path(&path)?, corpus);
        Ok(())
    }
}
