use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::catalog::Namespace;
use crate::common::{fail_point, ALLOW_SETTING_MALFORMED_COLLECTION_VALIDATORS};
use crate::document::Document;
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use crate::transaction::TransactionContext;
use crate::validation::{
    AllowedFeatures, FeatureVersion, Predicate, PredicateCompiler, ValidationAction,
    ValidationLevel,
};

/// A collection validator: the raw spec, its compiled predicate and the
/// compile error, if any.
///
/// A validator that failed to compile is still a valid value. Collections
/// persisted by older versions must stay loadable, so the error is only
/// reported when a write actually needs the predicate.
#[derive(Clone, Default)]
pub struct Validator {
    spec: Document,
    predicate: Option<Arc<dyn Predicate>>,
    error: Option<QuarryError>,
}

impl Validator {
    /// A validator that accepts everything.
    pub fn none() -> Self {
        Self::default()
    }

    /// Compiles `spec` for a collection in `ns`. Never fails; problems are
    /// stored in the returned validator.
    pub fn parse(
        compiler: &dyn PredicateCompiler,
        ns: &Namespace,
        spec: &Document,
        level: Option<ValidationLevel>,
        action: Option<ValidationAction>,
        max_version: Option<FeatureVersion>,
    ) -> Validator {
        let malformed_allowed = fail_point(ALLOW_SETTING_MALFORMED_COLLECTION_VALIDATORS)
            .check_for_namespace(&ns.ns())
            .is_some();
        if malformed_allowed || spec.is_empty() {
            return Validator {
                spec: spec.clone(),
                predicate: None,
                error: None,
            };
        }

        if let Err(err) = check_validator_can_be_used_on_ns(spec, ns) {
            return Validator {
                spec: spec.clone(),
                predicate: None,
                error: Some(err),
            };
        }

        // encryption keywords only make sense when failures are rejected
        // for every write
        let mut allowed = AllowedFeatures::ALL;
        if action.unwrap_or_default() == ValidationAction::Warn
            || level.unwrap_or_default() == ValidationLevel::Moderate
        {
            allowed = allowed - AllowedFeatures::ENCRYPT_KEYWORDS;
        }

        match compiler.compile(spec, allowed, max_version) {
            Ok(predicate) => Validator {
                spec: spec.clone(),
                predicate: Some(predicate),
                error: None,
            },
            Err(err) => {
                let err = err.with_context("Parsing of collection validator failed");
                log::warn!("Collection {} has a malformed validator: {}", ns, err);
                Validator {
                    spec: spec.clone(),
                    predicate: None,
                    error: Some(err),
                }
            }
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn error(&self) -> Option<&QuarryError> {
        self.error.as_ref()
    }

    pub fn predicate(&self) -> Option<&Arc<dyn Predicate>> {
        self.predicate.as_ref()
    }

    pub fn spec(&self) -> &Document {
        &self.spec
    }

    /// True when the validator neither filters documents nor carries an error.
    pub fn is_inactive(&self) -> bool {
        self.predicate.is_none() && self.error.is_none()
    }
}

impl Debug for Validator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator")
            .field("spec", &self.spec)
            .field("compiled", &self.predicate.is_some())
            .field("error", &self.error.as_ref().map(|e| e.message().to_string()))
            .finish()
    }
}

/// Validator plus the level and action it is enforced with.
#[derive(Debug, Clone, Default)]
pub struct ValidationState {
    pub validator: Validator,
    pub level: Option<ValidationLevel>,
    pub action: Option<ValidationAction>,
}

impl ValidationState {
    pub fn new(
        validator: Validator,
        level: Option<ValidationLevel>,
        action: Option<ValidationAction>,
    ) -> Self {
        ValidationState {
            validator,
            level,
            action,
        }
    }

    pub fn level(&self) -> ValidationLevel {
        self.level.unwrap_or_default()
    }

    pub fn action(&self) -> ValidationAction {
        self.action.unwrap_or_default()
    }

    /// Checks `doc` against the validator.
    ///
    /// Passes when validation is off, disabled for the operation, the
    /// namespace is a temporary resharding collection or the validator is
    /// empty. A stored compile error is returned only when the predicate would
    /// otherwise be evaluated. Under the warn action a failing document is
    /// logged and accepted.
    pub fn check_document(
        &self,
        txn: &TransactionContext,
        ns: &Namespace,
        doc: &Document,
    ) -> QuarryResult<()> {
        if self.level() == ValidationLevel::Off
            || txn.is_validation_disabled()
            || ns.is_temporary_resharding_collection()
        {
            return Ok(());
        }

        if let Some(err) = self.validator.error() {
            return Err(err.clone());
        }

        let predicate = match self.validator.predicate() {
            Some(predicate) => predicate,
            None => return Ok(()),
        };

        if predicate.matches(doc)? {
            return Ok(());
        }

        let diagnostic = predicate.explain_failure(doc);
        if self.action() == ValidationAction::Warn {
            log::warn!(
                "Document would fail validation collection: {} doc: {} details: {}",
                ns,
                doc.id().map(|id| id.to_string()).unwrap_or_default(),
                diagnostic.as_ref().map(|d| d.to_string()).unwrap_or_default()
            );
            return Ok(());
        }

        let err = QuarryError::new("Document failed validation", ErrorKind::DocumentValidationFailure);
        Err(match diagnostic {
            Some(diagnostic) => err.with_diagnostic(diagnostic),
            None => err,
        })
    }

    /// Checks the new version of an updated document.
    ///
    /// Under the moderate level a failing new document is tolerated when the
    /// old document fails as well. A document that passes may never be
    /// updated into one that fails.
    pub fn check_update(
        &self,
        txn: &TransactionContext,
        ns: &Namespace,
        old_doc: &Document,
        new_doc: &Document,
    ) -> QuarryResult<()> {
        match self.check_document(txn, ns, new_doc) {
            Err(err)
                if err.kind() == &ErrorKind::DocumentValidationFailure
                    && self.level() == ValidationLevel::Moderate =>
            {
                match self.check_document(txn, ns, old_doc) {
                    Err(old_err) if old_err.kind() == &ErrorKind::DocumentValidationFailure => {
                        log::debug!(
                            "Allowing update of a document in {} that already failed validation",
                            ns
                        );
                        Ok(())
                    }
                    _ => Err(err),
                }
            }
            result => result,
        }
    }
}

/// Refuses validators on namespaces that may not carry one.
pub fn check_validator_can_be_used_on_ns(validator: &Document, ns: &Namespace) -> QuarryResult<()> {
    if validator.is_empty() {
        return Ok(());
    }

    // internal collections that still need schema enforcement
    if ns.is_temporary_resharding_collection() || ns.is_timeseries_buckets_collection() {
        return Ok(());
    }

    if ns.is_system() && !ns.is_drop_pending() {
        return Err(QuarryError::new(
            &format!("Document validators not allowed on system collection {}", ns),
            ErrorKind::InvalidOptions,
        ));
    }

    if ns.is_on_internal_db() {
        return Err(QuarryError::new(
            &format!(
                "Document validators are not allowed on collection {} in the {} internal database",
                ns,
                ns.db()
            ),
            ErrorKind::InvalidOptions,
        ));
    }
    Ok(())
}
