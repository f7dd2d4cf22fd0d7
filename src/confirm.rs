use log::debug;

use crate::model::TorrentAction;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationRequest {
    pub infohash: String,
    pub delete_files: bool,
    pub pending: bool,
}

/// A removal the workflow has cleared for sending to the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovedChange {
    pub infohash: String,
    pub action: TorrentAction,
}

/// Gate in front of remove/delete. Models a single modal dialog: at most
/// one request is pending and a newer request replaces it.
#[derive(Debug, Default)]
pub struct Confirmation {
    request: Option<ConfirmationRequest>,
    silent: bool,
    delete_files: bool,
    // "don't ask again" as ticked in the open dialog; only kept on confirm
    silent_choice: bool,
}

impl Confirmation {
    pub fn new(silent: bool, delete_files: bool) -> Self {
        Self {
            silent,
            delete_files,
            ..Self::default()
        }
    }

    pub fn is_pending(&self) -> bool {
        self.request.as_ref().is_some_and(|req| req.pending)
    }

    pub fn request(&self) -> Option<&ConfirmationRequest> {
        self.request.as_ref()
    }

    pub fn silent(&self) -> bool {
        self.silent
    }

    pub fn silent_choice(&self) -> bool {
        self.silent_choice
    }

    pub fn request_remove(&mut self, infohash: &str) -> Option<ApprovedChange> {
        if self.silent {
            self.request = None;
            return Some(ApprovedChange {
                infohash: infohash.to_string(),
                action: TorrentAction::removal(self.delete_files),
            });
        }
        if let Some(previous) = &self.request {
            debug!("replacing pending removal of {}", previous.infohash);
        }
        self.request = Some(ConfirmationRequest {
            infohash: infohash.to_string(),
            delete_files: self.delete_files,
            pending: true,
        });
        self.silent_choice = false;
        None
    }

    pub fn toggle_delete_files(&mut self) {
        if let Some(request) = self.request.as_mut() {
            request.delete_files = !request.delete_files;
        }
    }

    pub fn toggle_silent_choice(&mut self) {
        if self.is_pending() {
            self.silent_choice = !self.silent_choice;
        }
    }

    pub fn confirm(&mut self) -> Option<ApprovedChange> {
        let request = self.request.take().filter(|req| req.pending)?;
        self.delete_files = request.delete_files;
        if self.silent_choice {
            self.silent = true;
        }
        self.silent_choice = false;
        Some(ApprovedChange {
            infohash: request.infohash,
            action: TorrentAction::removal(request.delete_files),
        })
    }

    pub fn cancel(&mut self) {
        self.request = None;
        self.silent_choice = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_waits_for_confirmation() {
        let mut flow = Confirmation::new(false, false);
        assert_eq!(flow.request_remove("aa"), None);
        assert!(flow.is_pending());
        let change = flow.confirm().unwrap();
        assert_eq!(change.infohash, "aa");
        assert_eq!(change.action, TorrentAction::Remove);
        assert!(!flow.is_pending());
        assert!(flow.request().is_none());
    }

    #[test]
    fn delete_files_selects_delete_action() {
        let mut flow = Confirmation::new(false, false);
        flow.request_remove("aa");
        flow.toggle_delete_files();
        assert_eq!(flow.confirm().unwrap().action, TorrentAction::Delete);
    }

    #[test]
    fn cancel_sends_nothing() {
        let mut flow = Confirmation::new(false, false);
        flow.request_remove("aa");
        flow.cancel();
        assert!(!flow.is_pending());
        assert_eq!(flow.confirm(), None);
    }

    #[test]
    fn silent_mode_skips_dialog() {
        let mut flow = Confirmation::new(true, true);
        let change = flow.request_remove("aa").unwrap();
        assert_eq!(change.action, TorrentAction::Delete);
        assert!(!flow.is_pending());
    }

    #[test]
    fn last_request_wins() {
        let mut flow = Confirmation::new(false, false);
        flow.request_remove("aa");
        flow.request_remove("bb");
        assert_eq!(flow.confirm().unwrap().infohash, "bb");
        assert_eq!(flow.confirm(), None);
    }

    #[test]
    fn dont_ask_again_only_sticks_on_confirm() {
        let mut flow = Confirmation::new(false, false);
        flow.request_remove("aa");
        flow.toggle_silent_choice();
        flow.cancel();
        assert!(!flow.silent());

        flow.request_remove("aa");
        flow.toggle_silent_choice();
        flow.confirm();
        assert!(flow.silent());
        assert!(flow.request_remove("bb").is_some());
    }
}
