use std::{any::Any, error::Error};

use crate::StatusCode;

/// Общий интерфейс ошибок шины.
///
/// Любая ошибка, которая может уйти вызывающему коду или в конверт `topic#`,
/// должна уметь назвать свой [`StatusCode`]. Трейт object-safe: [`StackError`]
/// хранит ошибку как `dyn ErrorExt`.
///
/// [`StackError`]: crate::StackError
pub trait ErrorExt: Error + Send + Sync + 'static {
    /// Код статуса. Если не переопределён: [`StatusCode::Unspecified`].
    fn status_code(&self) -> StatusCode {
        StatusCode::Unspecified
    }

    /// Доступ к конкретному типу через `downcast_ref`.
    fn as_any(&self) -> &dyn Any;

    /// Число, которое публикуется в `topic#` для этой ошибки.
    fn return_code(&self) -> i32 {
        self.status_code().code()
    }

    /// Текст для приложения.
    ///
    /// У ошибок без кода собственный текст скрыт за описанием
    /// `Unspecified`.
    fn client_message(&self) -> String {
        let status = self.status_code();
        if status == StatusCode::Unspecified {
            status.description().to_owned()
        } else {
            self.to_string()
        }
    }

    /// Пары ключ/значение для полей `tracing`.
    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        vec![
            ("status_code", self.status_code().name().to_string()),
            ("return_code", self.return_code().to_string()),
        ]
    }
}
