use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{
    Capability, CapabilityError, CapabilityInput, CapabilityStore, PermissionDenied,
    ValidationError,
};

/// A set of capabilities, unique by action name.
///
/// Sets are unordered: members are kept sorted by name so that equality
/// and iteration are deterministic. A set bound to a [`Reference`] only
/// ever holds store-resolved capabilities, while a free standing set may
/// hold unpersisted candidates.
///
/// [`Reference`]: crate::Reference
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<Capability>", into = "Vec<Capability>")]
pub struct CapabilitySet {
    capabilities: Vec<Capability>,
}

impl CapabilitySet {
    /// Build a set, rejecting two capabilities for the same action.
    pub fn new(
        capabilities: impl IntoIterator<Item = Capability>,
    ) -> Result<Self, ValidationError> {
        let mut capabilities: Vec<Capability> = capabilities.into_iter().collect();
        capabilities.sort();

        if let Some(pair) = capabilities
            .windows(2)
            .find(|pair| pair[0].name() == pair[1].name())
        {
            return Err(ValidationError::DuplicateCapability(
                pair[0].name().to_string(),
            ));
        }

        Ok(Self { capabilities })
    }

    /// The empty set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of capabilities.
    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    /// Whether the set holds no capability.
    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Iterate members in name order.
    pub fn iter(&self) -> std::slice::Iter<'_, Capability> {
        self.capabilities.iter()
    }

    /// Members as a slice.
    pub fn as_slice(&self) -> &[Capability] {
        &self.capabilities
    }

    /// Capability held for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.capabilities
            .binary_search_by(|capability| capability.name().cmp(name))
            .ok()
            .map(|index| &self.capabilities[index])
    }

    /// Returns true if every capability of `other` is a legitimate
    /// attenuation of the same-named capability in `self`.
    ///
    /// An action present in `other` but absent here makes the result false:
    /// nothing is granted by omission.
    pub fn is_derived(&self, other: &CapabilitySet) -> bool {
        self.underived(other).is_empty()
    }

    /// Names of the capabilities in `other` that are not derived from `self`.
    pub fn underived(&self, other: &CapabilitySet) -> Vec<String> {
        other
            .iter()
            .filter(|item| {
                !self
                    .get(item.name())
                    .is_some_and(|capability| capability.is_derived(item))
            })
            .map(|item| item.name().to_string())
            .collect()
    }

    /// Actions held by any of `children` that this set does not derive,
    /// sorted and deduplicated.
    ///
    /// Non-empty when replacing a grant's capabilities with this set would
    /// leave grants already derived from it unreachable.
    pub fn stranded<'a>(
        &self,
        children: impl IntoIterator<Item = &'a CapabilitySet>,
    ) -> Vec<String> {
        let mut actions: Vec<String> = children
            .into_iter()
            .flat_map(|child| self.underived(child))
            .collect();
        actions.sort();
        actions.dedup();
        actions
    }

    /// Compute derived capabilities without touching a store.
    ///
    /// Without `items`, every capability that can still be handed on is
    /// attenuated into a leaf and the others are dropped. With `items`, each
    /// request must be a legitimate attenuation of the held capability of
    /// the same name. All failing actions are reported together in request
    /// order and nothing is derived unless every request passes.
    pub fn plan(
        &self,
        items: Option<Vec<CapabilityInput>>,
    ) -> Result<Vec<Capability>, CapabilityError> {
        let Some(items) = items else {
            return Ok(self
                .iter()
                .filter(|capability| capability.can_derive(Some(0)))
                .filter_map(|capability| capability.derive(Some(0)).ok())
                .collect());
        };

        let mut seen = HashSet::new();
        let mut derived = Vec::with_capacity(items.len());
        let mut denied = Vec::new();

        for item in items {
            let item = Capability::from(item);
            if !seen.insert(item.name().to_string()) {
                return Err(ValidationError::DuplicateCapability(item.name().to_string()).into());
            }

            match self.get(item.name()) {
                Some(capability) if capability.is_derived(&item) => derived.push(item),
                _ => denied.push(item.name().to_string()),
            }
        }

        if !denied.is_empty() {
            tracing::warn!(actions = ?denied, "capabilities can not be derived");
            return Err(PermissionDenied { actions: denied }.into());
        }

        Ok(derived)
    }

    /// Derive capabilities and resolve them through `store`, so identical
    /// `(name, max_derive)` pairs share one stored row.
    pub async fn derive_caps<S>(
        &self,
        store: &S,
        items: Option<Vec<CapabilityInput>>,
    ) -> Result<Vec<Capability>, CapabilityError>
    where
        S: CapabilityStore + ?Sized,
    {
        let candidates = self.plan(items)?;
        if candidates.is_empty() {
            return Ok(candidates);
        }

        Ok(store.get_or_create_many(&candidates).await?)
    }

    /// Derive a new in-memory set from this one. Nothing is persisted.
    pub fn derive(
        &self,
        items: Option<Vec<CapabilityInput>>,
    ) -> Result<CapabilitySet, CapabilityError> {
        Ok(CapabilitySet::new(self.plan(items)?)?)
    }
}

impl TryFrom<Vec<Capability>> for CapabilitySet {
    type Error = ValidationError;

    fn try_from(capabilities: Vec<Capability>) -> Result<Self, Self::Error> {
        Self::new(capabilities)
    }
}

impl From<CapabilitySet> for Vec<Capability> {
    fn from(set: CapabilitySet) -> Self {
        set.capabilities
    }
}

impl<'a> IntoIterator for &'a CapabilitySet {
    type Item = &'a Capability;
    type IntoIter = std::slice::Iter<'a, Capability>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for CapabilitySet {
    type Item = Capability;
    type IntoIter = std::vec::IntoIter<Capability>;

    fn into_iter(self) -> Self::IntoIter {
        self.capabilities.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Volatile;
    use pretty_assertions::assert_eq;

    const NAMES: [&str; 3] = ["action_1", "action_2", "action_3"];

    fn parent() -> CapabilitySet {
        CapabilitySet::new(NAMES.map(|name| Capability::new(name, 2))).unwrap()
    }

    fn child() -> CapabilitySet {
        CapabilitySet::new(parent().iter().map(|c| c.derive(None).unwrap())).unwrap()
    }

    fn names() -> Vec<CapabilityInput> {
        NAMES.iter().map(|name| CapabilityInput::from(*name)).collect()
    }

    fn leaves() -> Vec<Capability> {
        NAMES.iter().map(|name| Capability::leaf(*name)).collect()
    }

    #[test]
    fn it_rejects_duplicate_names() {
        let result = CapabilitySet::new([Capability::new("read", 1), Capability::new("read", 2)]);
        assert_eq!(
            result,
            Err(ValidationError::DuplicateCapability("read".into()))
        );
    }

    #[test]
    fn it_is_order_insensitive() {
        let a = CapabilitySet::new([Capability::leaf("b"), Capability::leaf("a")]).unwrap();
        let b = CapabilitySet::new([Capability::leaf("a"), Capability::leaf("b")]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn it_checks_derivation_between_sets() {
        assert!(parent().is_derived(&child()));
        assert!(!child().is_derived(&parent()));
    }

    #[test]
    fn it_is_not_derived_with_extra_capability() {
        let mut capabilities: Vec<Capability> = child().into();
        capabilities.push(Capability::new("missing_one", 10));
        let subset = CapabilitySet::new(capabilities).unwrap();

        assert!(!parent().is_derived(&subset));
        assert_eq!(parent().underived(&subset), vec!["missing_one".to_string()]);
    }

    #[test]
    fn it_lists_stranded_actions_once() {
        let narrowed = CapabilitySet::new([Capability::new(NAMES[0], 2)]).unwrap();
        let other = CapabilitySet::new([Capability::leaf(NAMES[2])]).unwrap();

        assert_eq!(
            narrowed.stranded([&child(), &other, &child()]),
            vec![NAMES[1].to_string(), NAMES[2].to_string()]
        );
        assert!(parent().stranded([&child(), &other]).is_empty());
    }

    #[test]
    fn it_derives_leaves_by_default() {
        assert_eq!(parent().plan(None).unwrap(), leaves());
    }

    #[test]
    fn it_drops_leaves_when_deriving_by_default() {
        let set = CapabilitySet::new([Capability::leaf("read"), Capability::new("write", 1)])
            .unwrap();
        assert_eq!(set.plan(None).unwrap(), vec![Capability::leaf("write")]);
    }

    #[test]
    fn it_derives_named_capabilities() {
        assert_eq!(parent().plan(Some(names())).unwrap(), leaves());
    }

    #[test]
    fn it_derives_requested_budgets() {
        let items: Vec<CapabilityInput> = NAMES
            .iter()
            .enumerate()
            .map(|(index, name)| CapabilityInput::from((*name, (index % 2) as u32)))
            .collect();

        let expected: Vec<Capability> = NAMES
            .iter()
            .enumerate()
            .map(|(index, name)| Capability::new(*name, (index % 2) as u32))
            .collect();

        assert_eq!(parent().plan(Some(items)).unwrap(), expected);
    }

    #[test]
    fn it_denies_missing_capability() {
        let mut items = names();
        items.push("missing_one".into());

        let error = parent().plan(Some(items)).unwrap_err();
        assert_eq!(
            error,
            CapabilityError::PermissionDenied(PermissionDenied::action("missing_one"))
        );
    }

    #[test]
    fn it_denies_over_budget_request() {
        let items = vec![
            NAMES[0].into(),
            NAMES[1].into(),
            (NAMES[2], 10).into(),
        ];

        let error = child().plan(Some(items)).unwrap_err();
        assert_eq!(
            error,
            CapabilityError::PermissionDenied(PermissionDenied::action(NAMES[2]))
        );
    }

    #[test]
    fn it_reports_every_failure_in_request_order() {
        let items = vec![
            "zeta".into(),
            (NAMES[1], 5).into(),
            NAMES[0].into(),
            "alpha".into(),
        ];

        let error = parent().plan(Some(items)).unwrap_err();
        assert_eq!(
            error,
            CapabilityError::PermissionDenied(PermissionDenied {
                actions: vec!["zeta".into(), NAMES[1].into(), "alpha".into()]
            })
        );
    }

    #[test]
    fn it_rejects_duplicate_requests() {
        let items = vec![NAMES[0].into(), (NAMES[0], 1).into()];
        assert_eq!(
            parent().plan(Some(items)),
            Err(CapabilityError::from(ValidationError::DuplicateCapability(
                NAMES[0].into()
            )))
        );
    }

    #[test]
    fn it_can_not_derive_from_leaves() {
        let leaves = parent().derive(Some(names())).unwrap();
        assert!(matches!(
            leaves.plan(Some(names())),
            Err(CapabilityError::PermissionDenied(_))
        ));
        assert!(leaves.plan(None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn it_resolves_derived_capabilities_through_the_store() {
        let store = Volatile::new();

        let first = parent().derive_caps(&store, None).await.unwrap();
        let second = parent().derive_caps(&store, Some(names())).await.unwrap();

        assert_eq!(first, leaves());
        assert_eq!(second, leaves());
        assert_eq!(store.capability_count(), NAMES.len());
    }

    #[tokio::test]
    async fn it_skips_the_store_when_nothing_is_derived() {
        let store = Volatile::new();
        let set = CapabilitySet::new([Capability::leaf("read")]).unwrap();

        assert!(set.derive_caps(&store, None).await.unwrap().is_empty());
        assert_eq!(store.capability_count(), 0);
    }

    #[test]
    fn it_serializes_as_a_list() {
        let set = CapabilitySet::new([Capability::new("read", 1)]).unwrap();
        let value = serde_json::to_value(&set).unwrap();
        assert_eq!(value, serde_json::json!([{ "name": "read", "max_derive": 1 }]));

        let duplicate = serde_json::json!([["read", 1], ["read", 0]]);
        assert!(serde_json::from_value::<CapabilitySet>(duplicate).is_err());
    }
}
