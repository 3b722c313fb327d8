use std::collections::HashMap;

use log::debug;
use serde::Serialize;

use crate::election::{BallotStyleId, Election, PrecinctId};
use crate::error::{InterpretError, LayoutKind, Result};
use crate::layout::BallotPageLayout;
use crate::metadata::{BallotLocales, BallotPageMetadata};

/// Identifies one registered template.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateKey {
    pub locales: Option<BallotLocales>,
    pub ballot_style_id: BallotStyleId,
    pub precinct_id: PrecinctId,
    pub page_number: u32,
}

impl From<&BallotPageMetadata> for TemplateKey {
    fn from(metadata: &BallotPageMetadata) -> Self {
        TemplateKey {
            locales: metadata.locales.clone(),
            ballot_style_id: metadata.ballot_style_id.clone(),
            precinct_id: metadata.precinct_id.clone(),
            page_number: metadata.page_number,
        }
    }
}

/// Describes a template that has not been registered yet. Without a page
/// number, nothing is known about the ballot style/precinct yet and page 1 is
/// needed first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialTemplateSpecifier {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locales: Option<BallotLocales>,
    pub ballot_style_id: BallotStyleId,
    pub precinct_id: PrecinctId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
}

/// How far along template registration is for one ballot style and precinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Empty,
    PartiallyTemplated,
    Ready,
}

/// Registered blank ballot layouts, at most one per `TemplateKey`.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    test_mode: bool,
    locale_configs: Vec<Option<BallotLocales>>,
    templates: HashMap<TemplateKey, BallotPageLayout>,
}

impl TemplateStore {
    /// `locale_configs` lists every locale pairing ballots are printed in;
    /// `vec![None]` means ballots carry no locale information.
    pub fn new(test_mode: bool, locale_configs: Vec<Option<BallotLocales>>) -> Self {
        TemplateStore {
            test_mode,
            locale_configs,
            templates: HashMap::new(),
        }
    }

    pub fn test_mode(&self) -> bool {
        self.test_mode
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Adds or replaces the template for the page the layout was found on.
    pub fn register(&mut self, layout: BallotPageLayout) -> Result<()> {
        let metadata = layout.metadata();
        if metadata.is_test_ballot != self.test_mode {
            return Err(InterpretError::TestModeMismatch {
                kind: LayoutKind::Template,
                test_mode: self.test_mode,
                is_test_ballot: metadata.is_test_ballot,
            });
        }

        let key = TemplateKey::from(metadata);
        debug!("registering template {:?}", key);
        self.templates.insert(key, layout);
        Ok(())
    }

    pub fn lookup(&self, key: &TemplateKey) -> Option<&BallotPageLayout> {
        self.templates.get(key)
    }

    fn page(
        &self,
        locales: Option<&BallotLocales>,
        ballot_style_id: &BallotStyleId,
        precinct_id: &PrecinctId,
        page_number: u32,
    ) -> Option<&BallotPageLayout> {
        self.lookup(&TemplateKey {
            locales: locales.cloned(),
            ballot_style_id: ballot_style_id.clone(),
            precinct_id: precinct_id.clone(),
            page_number,
        })
    }

    /// Pages not yet registered for one locale pairing, in page order. Page 1
    /// says how many pages there are, so without it only page 1 can be asked
    /// for. Later pages are checked one at a time as the sequence is consumed.
    fn missing_pages<'a>(
        &'a self,
        locales: Option<&'a BallotLocales>,
        ballot_style_id: &'a BallotStyleId,
        precinct_id: &'a PrecinctId,
    ) -> impl Iterator<Item = PartialTemplateSpecifier> + Clone + 'a {
        let page_count = self
            .page(locales, ballot_style_id, precinct_id, 1)
            .map(|page_1| page_1.metadata().page_count);
        let first_page = page_count.is_none().then_some(None);
        let later_pages = (2..=page_count.unwrap_or(0))
            .filter(move |&page_number| {
                self.page(locales, ballot_style_id, precinct_id, page_number)
                    .is_none()
            })
            .map(Some);

        let specifier = move |page_number| PartialTemplateSpecifier {
            locales: locales.cloned(),
            ballot_style_id: ballot_style_id.clone(),
            precinct_id: precinct_id.clone(),
            page_number,
        };

        first_page.into_iter().chain(later_pages).map(specifier)
    }

    /// Whether every page of the ballot style/precinct is registered for every
    /// configured locale pairing.
    pub fn is_complete(&self, ballot_style_id: &BallotStyleId, precinct_id: &PrecinctId) -> bool {
        self.locale_configs.iter().all(|locales| {
            self.missing_pages(locales.as_ref(), ballot_style_id, precinct_id)
                .next()
                .is_none()
        })
    }

    pub fn state(&self, ballot_style_id: &BallotStyleId, precinct_id: &PrecinctId) -> SessionState {
        if self.is_complete(ballot_style_id, precinct_id) {
            return SessionState::Ready;
        }

        let any_registered = self
            .templates
            .keys()
            .any(|key| &key.ballot_style_id == ballot_style_id && &key.precinct_id == precinct_id);
        if any_registered {
            SessionState::PartiallyTemplated
        } else {
            SessionState::Empty
        }
    }

    /// Whether a ballot page with this metadata can be interpreted: its page
    /// and every page before it are registered, and the page's template agrees
    /// on whether it is a test ballot.
    pub fn can_interpret(&self, metadata: &BallotPageMetadata) -> bool {
        for page_number in 1..=metadata.page_number {
            let template = match self.page(
                metadata.locales.as_ref(),
                &metadata.ballot_style_id,
                &metadata.precinct_id,
                page_number,
            ) {
                Some(template) => template,
                None => {
                    debug!(
                        "cannot interpret ballot because template page {} of {} is missing",
                        page_number, metadata.page_count
                    );
                    return false;
                }
            };

            if page_number == metadata.page_number
                && template.metadata().is_test_ballot != metadata.is_test_ballot
            {
                debug!(
                    "cannot interpret ballot because template page {} has is_test_ballot={}",
                    page_number,
                    template.metadata().is_test_ballot
                );
                return false;
            }
        }

        true
    }

    /// Lists the templates still needed to cover every ballot style and
    /// precinct in the election. The sequence is computed lazily; call again
    /// (or clone it) to start over after registering more templates.
    pub fn missing_templates<'a>(
        &'a self,
        election: &'a Election,
    ) -> impl Iterator<Item = PartialTemplateSpecifier> + Clone + 'a {
        self.locale_configs.iter().flat_map(move |locales| {
            election.ballot_styles.iter().flat_map(move |ballot_style| {
                ballot_style.precincts.iter().flat_map(move |precinct_id| {
                    self.missing_pages(locales.as_ref(), &ballot_style.id, precinct_id)
                })
            })
        })
    }

    pub fn has_missing_templates(&self, election: &Election) -> bool {
        self.missing_templates(election).next().is_some()
    }
}
