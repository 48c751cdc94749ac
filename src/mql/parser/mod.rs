//! Parser combinators over the query model.
//!
//! A [`Parser`] is a pure function `&I -> Result<O, E>`. Expected failures are
//! values and each combinator nests the upstream error type inside its own, so a
//! caller can always tell which step failed.
//!
//! `zip` is the only combinator that runs work in parallel: both sides are
//! forked on the rayon pool before either is joined.

pub mod components;

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

/// Failure of one of two sequential steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Either<L, R> {
    Left(L),
    Right(R),
}

/// Failure of one or both sides of a `zip`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EitherInclusive<L, R> {
    Left(L),
    Right(R),
    Both(L, R),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementDoesNotMatchFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOutOfBounds;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoConditionFulfilled;

/// A type-erased failure. Keeps the debug rendering of the original error.
#[derive(Clone)]
pub struct AnyError(Arc<dyn fmt::Debug + Send + Sync>);

impl AnyError {
    pub fn new(error: impl fmt::Debug + Send + Sync + 'static) -> Self {
        AnyError(Arc::new(error))
    }
}

impl fmt::Debug for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AnyError({:?})", self.0)
    }
}

type ParseFn<I, E, O> = dyn Fn(&I) -> Result<O, E> + Send + Sync;

pub struct Parser<I, E, O> {
    run: Arc<ParseFn<I, E, O>>,
}

impl<I, E, O> Clone for Parser<I, E, O> {
    fn clone(&self) -> Self {
        Self {
            run: Arc::clone(&self.run),
        }
    }
}

impl<I, E, O> fmt::Debug for Parser<I, E, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Parser")
    }
}

impl<I: 'static, E: 'static, O: 'static> Parser<I, E, O> {
    pub fn new(run: impl Fn(&I) -> Result<O, E> + Send + Sync + 'static) -> Self {
        Self { run: Arc::new(run) }
    }

    pub fn parse(&self, input: &I) -> Result<O, E> {
        (self.run)(input)
    }

    pub fn map<O2: 'static>(self, map: impl Fn(O) -> O2 + Send + Sync + 'static) -> Parser<I, E, O2> {
        Parser::new(move |input| self.parse(input).map(&map))
    }

    pub fn map_error<E2: 'static>(
        self,
        map: impl Fn(E) -> E2 + Send + Sync + 'static,
    ) -> Parser<I, E2, O> {
        Parser::new(move |input| self.parse(input).map_err(&map))
    }

    /// Turns a success that doesn't satisfy `predicate` into `ElementDoesNotMatchFilter`.
    pub fn filter(
        self,
        predicate: impl Fn(&O) -> bool + Send + Sync + 'static,
    ) -> Parser<I, Either<E, ElementDoesNotMatchFilter>, O> {
        Parser::new(move |input| match self.parse(input) {
            Err(error) => Err(Either::Left(error)),
            Ok(output) if predicate(&output) => Ok(output),
            Ok(_) => Err(Either::Right(ElementDoesNotMatchFilter)),
        })
    }

    /// Like `filter` with a parser as predicate. A failing predicate counts as `false`.
    pub fn matches<EA: 'static>(
        self,
        predicate: Parser<O, EA, bool>,
    ) -> Parser<I, Either<E, ElementDoesNotMatchFilter>, O> {
        Parser::new(move |input| match self.parse(input) {
            Err(error) => Err(Either::Left(error)),
            Ok(output) => match predicate.parse(&output) {
                Ok(true) => Ok(output),
                _ => Err(Either::Right(ElementDoesNotMatchFilter)),
            },
        })
    }

    /// `true` on success, the error otherwise.
    pub fn as_matcher(self) -> Parser<I, E, bool> {
        self.map(|_| true)
    }

    pub fn flat_map<E2: 'static, O2: 'static>(
        self,
        next: Parser<O, E2, O2>,
    ) -> Parser<I, Either<E, E2>, O2> {
        Parser::new(move |input| match self.parse(input) {
            Err(error) => Err(Either::Left(error)),
            Ok(output) => next.parse(&output).map_err(Either::Right),
        })
    }

    /// Runs both parsers on the same input in parallel. When both fail, both errors are kept.
    pub fn zip<E2: 'static, O2: 'static>(
        self,
        second: Parser<I, E2, O2>,
    ) -> Parser<I, EitherInclusive<E, E2>, (O, O2)>
    where
        I: Sync,
        E: Send,
        O: Send,
        E2: Send,
        O2: Send,
    {
        Parser::new(move |input| {
            let (first, second) = rayon::join(|| self.parse(input), || second.parse(input));
            match (first, second) {
                (Ok(first), Ok(second)) => Ok((first, second)),
                (Err(first), Ok(_)) => Err(EitherInclusive::Left(first)),
                (Ok(_), Err(second)) => Err(EitherInclusive::Right(second)),
                (Err(first), Err(second)) => Err(EitherInclusive::Both(first, second)),
            }
        })
    }

    /// Total fallback: the resulting parser can't fail.
    pub fn recover_error(
        self,
        recover: impl Fn(E) -> O + Send + Sync + 'static,
    ) -> Parser<I, Infallible, O> {
        Parser::new(move |input| Ok(self.parse(input).unwrap_or_else(&recover)))
    }

    pub fn any_error(self) -> Parser<I, AnyError, O>
    where
        E: fmt::Debug + Send + Sync,
    {
        self.map_error(AnyError::new)
    }
}

impl<I: 'static, E: 'static, T: 'static> Parser<I, E, Vec<T>> {
    /// Applies `each` to every element. Any failing element fails the whole list.
    pub fn map_many<E2: 'static, O2: 'static>(
        self,
        each: Parser<T, E2, O2>,
    ) -> Parser<I, Either<E, Vec<E2>>, Vec<O2>> {
        Parser::new(move |input| {
            let items = self.parse(input).map_err(Either::Left)?;
            let mut outputs = Vec::with_capacity(items.len());
            let mut errors = Vec::new();
            for item in &items {
                match each.parse(item) {
                    Ok(output) => outputs.push(output),
                    Err(error) => errors.push(error),
                }
            }

            if errors.is_empty() {
                Ok(outputs)
            } else {
                Err(Either::Right(errors))
            }
        })
    }

    pub fn nth(self, index: usize) -> Parser<I, Either<E, IndexOutOfBounds>, T> {
        Parser::new(move |input| {
            let mut items = self.parse(input).map_err(Either::Left)?;
            if index < items.len() {
                Ok(items.swap_remove(index))
            } else {
                Err(Either::Right(IndexOutOfBounds))
            }
        })
    }
}

impl<I: 'static, E: 'static, T: 'static> Parser<I, E, Vec<Option<T>>> {
    pub fn filter_not_none_many(self) -> Parser<I, E, Vec<T>> {
        self.map(|items| items.into_iter().flatten().collect())
    }
}

/// A parser that returns its input.
pub fn identity<I: Clone + 'static>() -> Parser<I, Infallible, I> {
    Parser::new(|input: &I| Ok(input.clone()))
}

pub fn succeed<I: 'static, E: 'static, O: Clone + Send + Sync + 'static>(value: O) -> Parser<I, E, O> {
    Parser::new(move |_| Ok(value.clone()))
}

pub fn fail<I: 'static, E: Clone + Send + Sync + 'static, O: 'static>(error: E) -> Parser<I, E, O> {
    Parser::new(move |_| Err(error.clone()))
}

/// Always succeeds with a value computed by `default`.
pub fn otherwise<I: 'static, E: 'static, O: 'static>(
    default: impl Fn() -> O + Send + Sync + 'static,
) -> Parser<I, E, O> {
    Parser::new(move |_| Ok(default()))
}

pub fn equals<I: PartialEq + Send + Sync + 'static, E: 'static>(value: I) -> Parser<I, E, bool> {
    Parser::new(move |input| Ok(*input == value))
}

pub fn not<I: 'static, E: 'static>(parser: Parser<I, E, bool>) -> Parser<I, E, bool> {
    parser.map(|matched| !matched)
}

pub fn require_some<I: Clone + 'static, E: Clone + Send + Sync + 'static>(
    error: E,
) -> Parser<Option<I>, E, I> {
    Parser::new(move |input: &Option<I>| input.clone().ok_or_else(|| error.clone()))
}

/// Ordered alternation: runs the body of the first branch whose guard succeeds with `true`.
pub fn cond<I: 'static, E: 'static, O: 'static>(
    branches: Vec<(Parser<I, AnyError, bool>, Parser<I, E, O>)>,
) -> Parser<I, Either<NoConditionFulfilled, E>, O> {
    Parser::new(move |input| {
        let branch = branches
            .iter()
            .find(|(guard, _)| matches!(guard.parse(input), Ok(true)));

        match branch {
            Some((_, body)) => body.parse(input).map_err(Either::Right),
            None => Err(Either::Left(NoConditionFulfilled)),
        }
    })
}

/// The result of the first parser that succeeds.
pub fn first<I: 'static, E: 'static, O: 'static>(
    parsers: Vec<Parser<I, E, O>>,
) -> Parser<I, Either<NoConditionFulfilled, E>, O> {
    Parser::new(move |input| {
        parsers
            .iter()
            .find_map(|parser| parser.parse(input).ok())
            .ok_or(Either::Left(NoConditionFulfilled))
    })
}
