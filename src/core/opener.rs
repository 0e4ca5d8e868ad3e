use crate::core::error::DispatchError;

/// Capability to show a URL to the user
#[cfg_attr(test, mockall::automock)]
pub trait UrlOpener {
    fn open(&self, url: &str) -> Result<(), DispatchError>;
}

impl<T: UrlOpener + ?Sized> UrlOpener for Box<T> {
    fn open(&self, url: &str) -> Result<(), DispatchError> {
        (**self).open(url)
    }
}

/// Opens URLs in the host's default browser
#[derive(Debug, Default, Clone, Copy)]
pub struct BrowserOpener;

impl UrlOpener for BrowserOpener {
    fn open(&self, url: &str) -> Result<(), DispatchError> {
        log::info!("Opening browser to: {url}");
        open::that(url)?;
        Ok(())
    }
}

/// Only reports the URL, for hosts without a display
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOpener;

impl UrlOpener for LogOpener {
    fn open(&self, url: &str) -> Result<(), DispatchError> {
        log::info!("Browser disabled, card URL: {url}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_opener_never_fails() {
        assert!(LogOpener.open("http://maomao.com/AABBCCDD").is_ok());
        assert!(LogOpener.open("").is_ok());
    }

    #[test]
    fn test_boxed_opener_delegates() {
        let mut mock = MockUrlOpener::new();
        mock.expect_open()
            .withf(|url| url == "http://maomao.com/01")
            .times(1)
            .returning(|_| Ok(()));
        let boxed: Box<dyn UrlOpener> = Box::new(mock);
        assert!(boxed.open("http://maomao.com/01").is_ok());
    }

    #[test]
    fn test_dispatch_error_message() {
        let err = DispatchError::from(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "xdg-open not found",
        ));
        assert_eq!(err.to_string(), "Failed to open the browser: xdg-open not found");
    }
}
