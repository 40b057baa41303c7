//! Document queries and tree edits.

use std::fmt;

use xot::Xot;

use crate::{Error, Result};

/// Handle to a node owned by an [`XmlDocument`].
pub use xot::Node as NodeId;

/// An XML document owning all of its nodes.
///
/// Names are resolved to (namespace, local name) pairs at parse time, so
/// moving a subtree never changes what its elements mean. Prefixes are
/// chosen again when the document is serialized.
pub struct XmlDocument {
    pub(super) xot: Xot,
    pub(super) document: NodeId,
    pub(super) indent: bool,
}

pub(super) fn xml_error(e: impl fmt::Display) -> Error {
    Error::Xml(e.to_string())
}

impl XmlDocument {
    /// Parse a complete document; input without a root element is rejected
    pub fn parse(input: &str) -> Result<Self> {
        let mut xot = Xot::new();
        let document = xot.parse(input).map_err(xml_error)?;
        Ok(Self {
            xot,
            document,
            indent: false,
        })
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// The document element, if any
    #[must_use]
    pub fn root(&self) -> Option<NodeId> {
        self.xot
            .children(self.document)
            .find(|&node| self.xot.is_element(node))
    }

    /// Whether `id` is an element node
    #[must_use]
    pub fn is_element(&self, id: NodeId) -> bool {
        self.xot.is_element(id)
    }

    /// Local part of an element name
    #[must_use]
    pub fn local_name(&self, id: NodeId) -> Option<&str> {
        self.xot
            .element(id)
            .map(|element| self.xot.local_name_str(element.name()))
    }

    /// Namespace URI of an element; `None` for elements in no namespace
    #[must_use]
    pub fn namespace_uri(&self, id: NodeId) -> Option<&str> {
        let element = self.xot.element(id)?;
        let namespace = self.xot.namespace_for_name(element.name());
        (namespace != self.xot.no_namespace()).then(|| self.xot.namespace_str(namespace))
    }

    /// Parent node
    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.xot.parent(id)
    }

    /// Element children in document order
    pub fn child_elements(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.xot
            .children(id)
            .filter(|&child| self.xot.is_element(child))
    }

    /// Whether `id` is the element `{ns}local`
    #[must_use]
    pub fn is_named(&self, id: NodeId, ns: &str, local: &str) -> bool {
        let Some(element) = self.xot.element(id) else {
            return false;
        };
        self.xot
            .namespace(ns)
            .and_then(|namespace| self.xot.name_ns(local, namespace))
            .is_some_and(|name| element.name() == name)
    }

    /// Element children named `{ns}local`
    #[must_use]
    pub fn children_named(&self, id: NodeId, ns: &str, local: &str) -> Vec<NodeId> {
        self.child_elements(id)
            .filter(|&child| self.is_named(child, ns, local))
            .collect()
    }

    /// First element child named `{ns}local`
    #[must_use]
    pub fn first_child_named(&self, id: NodeId, ns: &str, local: &str) -> Option<NodeId> {
        self.child_elements(id)
            .find(|&child| self.is_named(child, ns, local))
    }

    /// Elements reached from `id` by following `path`, one child step per
    /// local name, all in namespace `ns`
    #[must_use]
    pub fn find_path(&self, id: NodeId, ns: &str, path: &[&str]) -> Vec<NodeId> {
        path.iter().fold(vec![id], |current, step| {
            current
                .into_iter()
                .flat_map(|node| self.children_named(node, ns, step))
                .collect()
        })
    }

    /// All elements named `{ns}local`, in document order
    #[must_use]
    pub fn descendants_named(&self, ns: &str, local: &str) -> Vec<NodeId> {
        self.xot
            .descendants(self.document)
            .filter(|&node| self.is_named(node, ns, local))
            .collect()
    }

    /// Concatenated character data below `id`
    #[must_use]
    pub fn text(&self, id: NodeId) -> String {
        self.xot
            .descendants(id)
            .filter_map(|node| self.xot.text_str(node))
            .collect()
    }

    /// Value of the unqualified attribute `name`
    #[must_use]
    pub fn attribute(&self, id: NodeId, name: &str) -> Option<String> {
        let name = self.xot.name(name)?;
        self.xot.attributes(id).get(name).map(ToString::to_string)
    }

    // ── Edits ───────────────────────────────────────────────────────────

    /// New detached element `{ns}local`
    pub fn create_element(&mut self, ns: &str, local: &str) -> NodeId {
        let namespace = self.xot.add_namespace(ns);
        let name = self.xot.add_name_ns(local, namespace);
        self.xot.new_element(name)
    }

    /// New detached text node
    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.xot.new_text(text)
    }

    /// New detached comment
    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.xot.new_comment(text)
    }

    /// New detached processing instruction `<?target content?>`
    pub fn create_processing_instruction(&mut self, target: &str, content: &str) -> NodeId {
        let target = self.xot.add_name(target);
        self.xot.new_processing_instruction(target, Some(content))
    }

    /// Append `child` as the last child of `parent`
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.xot.append(parent, child).map_err(xml_error)
    }

    /// Append `<{ns}local>text</{ns}local>` to `parent`
    pub fn append_text_element(
        &mut self,
        parent: NodeId,
        ns: &str,
        local: &str,
        text: &str,
    ) -> Result<NodeId> {
        let element = self.create_element(ns, local);
        self.append_child(parent, element)?;
        self.set_text(element, text)?;
        Ok(element)
    }

    /// Insert a top-level node (comment, processing instruction) directly
    /// before the root element
    pub fn insert_before_root(&mut self, node: NodeId) -> Result<()> {
        let root = self
            .root()
            .ok_or_else(|| Error::Xml("Document has no root element".to_string()))?;
        self.xot.insert_before(root, node).map_err(xml_error)
    }

    /// Insert `node` as the next sibling of `reference`
    pub fn insert_after(&mut self, reference: NodeId, node: NodeId) -> Result<()> {
        self.xot.insert_after(reference, node).map_err(xml_error)
    }

    /// Put `new` in the place of `old`
    pub fn replace(&mut self, old: NodeId, new: NodeId) -> Result<()> {
        self.xot.replace(old, new).map_err(xml_error)
    }

    /// Remove `id` and its subtree
    pub fn remove(&mut self, id: NodeId) -> Result<()> {
        self.xot.remove(id).map_err(xml_error)
    }

    /// Replace the content of `id` with a single text node
    pub fn set_text(&mut self, id: NodeId, text: &str) -> Result<()> {
        let children: Vec<NodeId> = self.xot.children(id).collect();
        for child in children {
            self.remove(child)?;
        }
        if !text.is_empty() {
            let content = self.create_text(text);
            self.append_child(id, content)?;
        }
        Ok(())
    }

    /// Set the unqualified attribute `name`
    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) {
        let name = self.xot.add_name(name);
        self.xot.attributes_mut(id).insert(name, value.to_string());
    }

    /// Replace `old` with the root element of the standalone document `xml`.
    ///
    /// Elements of the fragment that are in no namespace keep that meaning
    /// below a parent with a default namespace: the topmost of them get an
    /// explicit `xmlns=""`.
    pub fn graft(&mut self, old: NodeId, xml: &str) -> Result<NodeId> {
        let fragment = self.xot.parse(xml).map_err(xml_error)?;
        let root = self
            .xot
            .children(fragment)
            .find(|&node| self.xot.is_element(node))
            .ok_or_else(|| Error::Xml("Fragment has no root element".to_string()))?;
        let copy = self.xot.clone_node(root);
        self.replace(old, copy)?;
        self.undeclare_default_namespace(copy);
        Ok(copy)
    }

    fn in_no_namespace(&self, id: NodeId) -> bool {
        self.xot
            .element(id)
            .is_some_and(|element| self.xot.namespace_for_name(element.name()) == self.xot.no_namespace())
    }

    fn undeclare_default_namespace(&mut self, top: NodeId) {
        let targets: Vec<NodeId> = self
            .xot
            .descendants(top)
            .filter(|&node| self.in_no_namespace(node))
            .filter(|&node| !self.xot.parent(node).is_some_and(|parent| self.in_no_namespace(parent)))
            .collect();

        let empty = self.xot.empty_prefix();
        let none = self.xot.no_namespace();
        for node in targets {
            self.xot.namespaces_mut(node).insert(empty, none);
        }
    }
}

impl fmt::Debug for XmlDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XmlDocument")
            .field("indent", &self.indent)
            .finish_non_exhaustive()
    }
}
